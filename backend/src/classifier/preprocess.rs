use image::{imageops::FilterType, DynamicImage};
use ndarray::Array4;

use super::ClassifierError;

pub const INPUT_SIZE: u32 = 224;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

pub fn decode(bytes: &[u8]) -> Result<DynamicImage, ClassifierError> {
    Ok(image::load_from_memory(bytes)?)
}

/// `[1, size, size, 3]`, pixels scaled to `[-1, 1]` (Keras MobileNetV2).
pub fn to_nhwc_scaled(image: &DynamicImage, size: u32) -> Array4<f32> {
    let rgb = image.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    let size = size as usize;
    Array4::from_shape_fn((1, size, size, 3), |(_, y, x, c)| {
        let pixel = rgb.get_pixel(x as u32, y as u32);
        pixel[c] as f32 / 127.5 - 1.0
    })
}

/// `[1, 3, size, size]`, ImageNet mean/std normalisation (torchvision).
pub fn to_nchw_normalized(image: &DynamicImage, size: u32) -> Array4<f32> {
    let rgb = image.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    let size = size as usize;
    Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        let pixel = rgb.get_pixel(x as u32, y as u32);
        (pixel[c] as f32 / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c]
    })
}
