use std::path::Path;
use std::sync::{Arc, Mutex};

use tch::{CModule, Device, Kind, Tensor};

use super::labels::LabelVocabulary;
use super::preprocess::{self, INPUT_SIZE};
use super::{rank, ClassifierError, LabelClassifier, Prediction};

impl From<tch::TchError> for ClassifierError {
    fn from(err: tch::TchError) -> Self {
        ClassifierError::Model(err.to_string())
    }
}

/// TorchScript module (torchvision-style NCHW input). `CModule` is not
/// safe for concurrent forward passes, so calls are serialized.
#[derive(Clone)]
pub struct TorchClassifier {
    model: Arc<Mutex<CModule>>,
    device: Device,
    labels: Arc<LabelVocabulary>,
    top_k: usize,
}

impl TorchClassifier {
    pub fn new(
        model_path: &Path,
        labels: LabelVocabulary,
        top_k: usize,
    ) -> Result<Self, ClassifierError> {
        let device = Device::cuda_if_available();
        let module = CModule::load_on_device(model_path, device)?;
        log::info!(
            "Loaded TorchScript model from {} on {:?}",
            model_path.display(),
            device
        );
        Ok(Self {
            model: Arc::new(Mutex::new(module)),
            device,
            labels: Arc::new(labels),
            top_k,
        })
    }

    fn preprocess(&self, image: &[u8]) -> Result<Tensor, ClassifierError> {
        let decoded = preprocess::decode(image)?;
        let array = preprocess::to_nchw_normalized(&decoded, INPUT_SIZE);
        let data = array
            .as_slice()
            .ok_or_else(|| ClassifierError::Preprocessing("input tensor is not contiguous".into()))?;
        let size = INPUT_SIZE as i64;
        Ok(Tensor::from_slice(data)
            .view([1, 3, size, size])
            .to_device(self.device))
    }
}

impl LabelClassifier for TorchClassifier {
    fn classify(&self, image: &[u8]) -> Result<Vec<Prediction>, ClassifierError> {
        let tensor = self.preprocess(image)?;
        let output = {
            let model = self
                .model
                .lock()
                .map_err(|_| ClassifierError::Model("model lock poisoned".into()))?;
            model.forward_ts(&[tensor])?
        };
        let output = output
            .softmax(-1, Kind::Float)
            .view([-1])
            .to_device(Device::Cpu);
        let scores = Vec::<f32>::try_from(&output)?;
        rank(&scores, &self.labels, self.top_k)
    }
}
