//! Dense training matrix built from sparse per-user feature maps.

use crate::features::FeatureVector;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeSet, HashMap};

/// Value used for a feature a user never reported.
pub const MISSING: f64 = 0.0;

/// Holdouts are skipped below this many rows.
const MIN_ROWS_FOR_HOLDOUT: usize = 5;

pub struct Dataset {
    /// Sorted union of feature names; column order of `x`
    pub schema: Vec<String>,
    pub x: Array2<f64>,
    pub y: Vec<u8>,
}

impl Dataset {
    pub fn from_vectors(vectors: &[FeatureVector]) -> Self {
        let schema: Vec<String> = vectors
            .iter()
            .flat_map(|v| v.features.keys())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .cloned()
            .collect();
        let column: HashMap<&str, usize> = schema
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut x = Array2::from_elem((vectors.len(), schema.len()), MISSING);
        for (row, v) in vectors.iter().enumerate() {
            for (name, value) in &v.features {
                x[[row, column[name.as_str()]]] = *value;
            }
        }
        Self {
            schema,
            x,
            y: vectors.iter().map(|v| v.label).collect(),
        }
    }

    pub fn rows(&self) -> usize {
        self.y.len()
    }

    pub fn positives(&self) -> usize {
        self.y.iter().filter(|&&l| l == 1).count()
    }

    pub fn negatives(&self) -> usize {
        self.rows() - self.positives()
    }

    /// Seeded stratified split into (train, test) row indices, both sorted. Each class keeps
    /// at least one row in train; small datasets train on everything.
    pub fn holdout_split(&self, fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
        let all: Vec<usize> = (0..self.rows()).collect();
        if self.rows() < MIN_ROWS_FOR_HOLDOUT || fraction <= 0.0 {
            return (all, Vec::new());
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut train = Vec::with_capacity(self.rows());
        let mut test = Vec::new();
        for class in [0u8, 1u8] {
            let mut idx: Vec<usize> = all.iter().copied().filter(|&i| self.y[i] == class).collect();
            idx.shuffle(&mut rng);
            let take = if idx.len() >= 2 {
                ((idx.len() as f64 * fraction).ceil() as usize).min(idx.len() - 1)
            } else {
                0
            };
            test.extend_from_slice(&idx[..take]);
            train.extend_from_slice(&idx[take..]);
        }
        train.sort_unstable();
        test.sort_unstable();
        (train, test)
    }
}
