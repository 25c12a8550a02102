//! Per-user feature extraction for the suggestion model.

mod behavioral;
mod extractor;

pub use behavioral::BehavioralFeatures;
pub use extractor::{Extraction, FeatureExtractor};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Numeric features of one user plus whether they completed the funnel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub user_id: String,
    pub features: BTreeMap<String, f64>,
    /// 1 when the user reached the final step
    pub label: u8,
}

impl FeatureVector {
    pub fn converted(&self) -> bool {
        self.label == 1
    }
}
