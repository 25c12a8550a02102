//! Suggestion model: which user features best predict reaching the funnel's final step.
//!
//! A fixed pipeline: union schema with zero fill, class-balance check, seeded stratified
//! holdout, bagged CART forest, mean-decrease-in-impurity importances. The output is a pure
//! function of the input vectors and [`ModelConfig`].

mod dataset;
mod forest;
mod tree;

pub use dataset::{Dataset, MISSING};
pub use forest::{ForestParams, RandomForest};
pub use tree::{DecisionTree, TreeParams};

use crate::config::ModelConfig;
use crate::error::{EngineError, Result};
use crate::features::FeatureVector;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionResult {
    /// `(feature, importance)` sorted by importance descending, then name ascending
    pub feature_importances: Vec<(String, f64)>,
    /// Accuracy on the held-out users, when there were enough of them
    pub ml_score: Option<f64>,
}

pub struct Suggester {
    config: ModelConfig,
}

impl Suggester {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn suggest(&self, vectors: &[FeatureVector]) -> Result<SuggestionResult> {
        let dataset = Dataset::from_vectors(vectors);
        let need = self.config.min_class_size.max(1);
        let (positives, negatives) = (dataset.positives(), dataset.negatives());
        if positives < need || negatives < need {
            return Err(EngineError::InsufficientData(format!(
                "need at least {need} users who reached the final step and {need} who did not, \
                 found {positives} and {negatives}"
            )));
        }
        if dataset.schema.is_empty() {
            return Err(EngineError::NoFeatures);
        }

        let (train, test) = dataset.holdout_split(self.config.holdout_fraction, self.config.seed);
        let params = self.forest_params(dataset.schema.len());
        let forest = RandomForest::fit(dataset.x.view(), &dataset.y, &train, &params);
        let ml_score = forest.accuracy(dataset.x.view(), &dataset.y, &test);

        let mut ranked: Vec<(String, f64)> = dataset
            .schema
            .iter()
            .cloned()
            .zip(forest.feature_importances())
            .collect();
        if ranked.iter().all(|(_, v)| *v == 0.0) {
            ranked.clear();
        }
        rank(&mut ranked);
        if self.config.top_n > 0 {
            ranked.truncate(self.config.top_n);
        }

        info!(
            users = dataset.rows(),
            features = dataset.schema.len(),
            positives,
            negatives,
            trees = forest.len(),
            ml_score = ?ml_score,
            "suggestion model trained"
        );
        Ok(SuggestionResult {
            feature_importances: ranked,
            ml_score,
        })
    }

    fn forest_params(&self, width: usize) -> ForestParams {
        let max_features = self
            .config
            .max_features
            .unwrap_or_else(|| (width as f64).sqrt().floor() as usize)
            .clamp(1, width.max(1));
        ForestParams {
            n_trees: self.config.n_trees.max(1),
            seed: self.config.seed,
            tree: TreeParams {
                max_depth: self.config.max_depth,
                min_samples_split: self.config.min_samples_split.max(2),
                max_features,
            },
        }
    }
}

/// Descending by importance, ties by name ascending.
fn rank(items: &mut [(String, f64)]) {
    items.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
}
