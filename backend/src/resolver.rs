//! Reduces a ranked label list to a [`Category`].
//!
//! Entries are scanned in rank order and the first one that says anything
//! wins, so a higher-confidence label always beats a lower one regardless
//! of which animal it names. Per entry, in `curated` mode:
//!
//! 1. exact member of the cat set → cat
//! 2. contains "dog" (any case) or exact member of the dog set → dog
//!
//! In `substring` mode the curated sets are ignored:
//!
//! 1. contains "dog" → dog
//! 2. contains "cat" → cat

use std::collections::HashSet;

use shared::Category;

use crate::classifier::Prediction;
use crate::config::{ConfigError, LabelConfig, LabelMatching};

#[derive(Debug, Clone)]
pub struct LabelSets {
    cat: HashSet<String>,
    dog: HashSet<String>,
    matching: LabelMatching,
}

impl LabelSets {
    pub fn new<C, D, S>(cat: C, dog: D, matching: LabelMatching) -> Result<Self, ConfigError>
    where
        C: IntoIterator<Item = S>,
        D: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cat: HashSet<String> = cat.into_iter().map(Into::into).collect();
        let dog: HashSet<String> = dog.into_iter().map(Into::into).collect();

        if let Some(label) = cat.intersection(&dog).next() {
            return Err(ConfigError::Invalid(format!(
                "label '{}' is listed as both cat and dog",
                label
            )));
        }

        Ok(Self { cat, dog, matching })
    }

    pub fn from_config(config: &LabelConfig) -> Result<Self, ConfigError> {
        Self::new(config.cat.clone(), config.dog.clone(), config.matching)
    }

    pub fn matching(&self) -> LabelMatching {
        self.matching
    }

    pub fn resolve(&self, predictions: &[Prediction]) -> Category {
        predictions
            .iter()
            .find_map(|prediction| self.match_label(&prediction.label))
            .unwrap_or(Category::Unknown)
    }

    fn match_label(&self, label: &str) -> Option<Category> {
        let lower = label.to_lowercase();
        match self.matching {
            LabelMatching::Curated => {
                if self.cat.contains(label) {
                    Some(Category::Cat)
                } else if lower.contains("dog") || self.dog.contains(label) {
                    Some(Category::Dog)
                } else {
                    None
                }
            }
            LabelMatching::Substring => {
                if lower.contains("dog") {
                    Some(Category::Dog)
                } else if lower.contains("cat") {
                    Some(Category::Cat)
                } else {
                    None
                }
            }
        }
    }
}
