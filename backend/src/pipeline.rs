//! Per-upload processing: store → classify → resolve → signal → release.
//!
//! Runs synchronously; the HTTP layer moves it onto the blocking pool.

use std::sync::Arc;

use shared::Category;

use crate::actuator::Actuator;
use crate::artifacts::{Artifact, ArtifactError, ArtifactStore};
use crate::classifier::{ClassifierError, LabelClassifier, Prediction};
use crate::resolver::LabelSets;

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: Category,
    pub predictions: Vec<Prediction>,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Storage(#[from] ArtifactError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error("Classifier returned no predictions")]
    NoPredictions,
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Storage(_) => "storage",
            PipelineError::Classifier(_) | PipelineError::NoPredictions => "classification",
        }
    }
}

pub struct Pipeline {
    artifacts: Arc<ArtifactStore>,
    classifier: Arc<dyn LabelClassifier>,
    labels: Arc<LabelSets>,
    actuator: Arc<dyn Actuator>,
    top_k: usize,
}

impl Pipeline {
    pub fn new(
        artifacts: Arc<ArtifactStore>,
        classifier: Arc<dyn LabelClassifier>,
        labels: Arc<LabelSets>,
        actuator: Arc<dyn Actuator>,
        top_k: usize,
    ) -> Self {
        Self {
            artifacts,
            classifier,
            labels,
            actuator,
            top_k,
        }
    }

    pub fn actuator(&self) -> &Arc<dyn Actuator> {
        &self.actuator
    }

    pub fn run(&self, upload: &[u8]) -> Result<Classification, PipelineError> {
        let artifact = self.artifacts.store(upload)?;
        log::debug!("Upload stored at {}", artifact.path().display());

        let outcome = self.classify_artifact(&artifact);
        if let Err(e) = &outcome {
            log::debug!("Pipeline failed after storing ({}): {}", e.kind(), e);
        }

        artifact.release();
        outcome
    }

    fn classify_artifact(&self, artifact: &Artifact) -> Result<Classification, PipelineError> {
        let image = artifact.read()?;

        let mut predictions = self.classifier.classify(&image)?;
        predictions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        predictions.truncate(self.top_k);
        if predictions.is_empty() {
            return Err(PipelineError::NoPredictions);
        }
        log::debug!("Classified upload, top label {}", predictions[0].label);

        let category = self.labels.resolve(&predictions);
        log::debug!("Resolved upload to {}", category);

        self.actuator.signal(category);

        Ok(Classification {
            category,
            predictions,
        })
    }
}
