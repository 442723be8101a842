//! Label classifiers. A classifier turns raw image bytes into a ranked
//! top-K list of ImageNet-style labels; everything after that is the
//! resolver's job.

pub mod labels;
pub mod onnx;
pub mod preprocess;
#[cfg(feature = "torch")]
pub mod torch;

use std::sync::Arc;

use serde::Serialize;

use crate::config::{ClassifierBackend, ClassifierConfig};
use labels::LabelVocabulary;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

impl Prediction {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Preprocessing error: {0}")]
    Preprocessing(String),
    #[error("Model error: {0}")]
    Model(String),
    #[error("Label vocabulary error: {0}")]
    Labels(String),
    #[error("Unsupported classifier backend: {0}")]
    Unsupported(String),
}

impl From<image::ImageError> for ClassifierError {
    fn from(err: image::ImageError) -> Self {
        ClassifierError::Preprocessing(err.to_string())
    }
}

/// Returns predictions ranked by descending confidence, at most top-K long.
pub trait LabelClassifier: Send + Sync {
    fn classify(&self, image: &[u8]) -> Result<Vec<Prediction>, ClassifierError>;
}

pub fn from_config(config: &ClassifierConfig) -> Result<Arc<dyn LabelClassifier>, ClassifierError> {
    let labels = LabelVocabulary::load(&config.labels_path)?;
    log::info!(
        "Loaded {} labels from {}",
        labels.len(),
        config.labels_path.display()
    );

    match config.backend {
        ClassifierBackend::Onnx => {
            let classifier = onnx::OnnxClassifier::new(&config.model_path, labels, config.top_k)?;
            Ok(Arc::new(classifier))
        }
        #[cfg(feature = "torch")]
        ClassifierBackend::Torch => {
            let classifier = torch::TorchClassifier::new(&config.model_path, labels, config.top_k)?;
            Ok(Arc::new(classifier))
        }
        #[cfg(not(feature = "torch"))]
        ClassifierBackend::Torch => Err(ClassifierError::Unsupported(
            "torch (rebuild with --features torch)".into(),
        )),
    }
}

/// Maps raw model scores onto the vocabulary and keeps the `top_k` best.
/// Logits are passed through softmax; scores that already form a
/// probability distribution are used as-is.
pub(crate) fn rank(
    scores: &[f32],
    labels: &LabelVocabulary,
    top_k: usize,
) -> Result<Vec<Prediction>, ClassifierError> {
    let already_probabilities = is_distribution(scores);

    // Some exports prepend a background class.
    let scores = if scores.len() == labels.len() + 1 {
        &scores[1..]
    } else {
        scores
    };

    if scores.len() != labels.len() {
        return Err(ClassifierError::Model(format!(
            "model produced {} scores for {} labels",
            scores.len(),
            labels.len()
        )));
    }

    let probabilities = if already_probabilities {
        scores.to_vec()
    } else {
        softmax(scores)
    };

    let mut indexed: Vec<(usize, f32)> = probabilities.into_iter().enumerate().collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed.truncate(top_k);

    Ok(indexed
        .into_iter()
        .filter_map(|(idx, p)| labels.get(idx).map(|label| Prediction::new(label, p)))
        .collect())
}

fn is_distribution(scores: &[f32]) -> bool {
    let in_range = scores.iter().all(|s| (0.0..=1.0).contains(s));
    let sum: f32 = scores.iter().sum();
    in_range && (sum - 1.0).abs() < 1e-3
}

fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
