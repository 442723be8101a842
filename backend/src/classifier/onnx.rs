use std::path::Path;

use tract_onnx::prelude::*;

use super::labels::LabelVocabulary;
use super::preprocess::{self, INPUT_SIZE};
use super::{rank, ClassifierError, LabelClassifier, Prediction};

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// MobileNetV2-style ONNX export taking NHWC input scaled to `[-1, 1]`.
/// The optimized plan is immutable, so concurrent requests run it without
/// a lock.
pub struct OnnxClassifier {
    plan: OnnxPlan,
    labels: LabelVocabulary,
    top_k: usize,
}

impl OnnxClassifier {
    pub fn new(
        model_path: &Path,
        labels: LabelVocabulary,
        top_k: usize,
    ) -> Result<Self, ClassifierError> {
        let size = INPUT_SIZE as usize;
        let plan = tract_onnx::onnx()
            .model_for_path(model_path)
            .and_then(|model| model.with_input_fact(0, f32::fact([1, size, size, 3]).into()))
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(|e| {
                ClassifierError::Model(format!(
                    "failed to load ONNX model {}: {}",
                    model_path.display(),
                    e
                ))
            })?;

        log::info!("Loaded ONNX model from {}", model_path.display());
        Ok(Self {
            plan,
            labels,
            top_k,
        })
    }
}

impl LabelClassifier for OnnxClassifier {
    fn classify(&self, image: &[u8]) -> Result<Vec<Prediction>, ClassifierError> {
        let decoded = preprocess::decode(image)?;
        let array = preprocess::to_nhwc_scaled(&decoded, INPUT_SIZE);
        let data = array
            .as_slice()
            .ok_or_else(|| ClassifierError::Preprocessing("input tensor is not contiguous".into()))?;

        let input = Tensor::from_shape(array.shape(), data)
            .map_err(|e| ClassifierError::Preprocessing(e.to_string()))?;

        let outputs = self
            .plan
            .run(tvec!(input.into_tvalue()))
            .map_err(|e| ClassifierError::Model(e.to_string()))?;

        let output = outputs
            .first()
            .ok_or_else(|| ClassifierError::Model("model produced no outputs".into()))?;
        let scores: Vec<f32> = output
            .to_array_view::<f32>()
            .map_err(|e| ClassifierError::Model(e.to_string()))?
            .iter()
            .copied()
            .collect();

        rank(&scores, &self.labels, self.top_k)
    }
}
