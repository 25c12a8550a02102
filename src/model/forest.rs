//! Bagged forest of CART trees. Trees train in parallel on the current rayon pool; each tree
//! draws from its own RNG derived from the forest seed, so results do not depend on scheduling.

use super::tree::{DecisionTree, TreeParams};
use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestParams {
    pub n_trees: usize,
    pub seed: u64,
    pub tree: TreeParams,
}

pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
}

fn tree_seed(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

impl RandomForest {
    /// Fit on the rows listed in `rows`. Each tree sees a bootstrap sample of them.
    pub fn fit(x: ArrayView2<'_, f64>, y: &[u8], rows: &[usize], params: &ForestParams) -> Self {
        let trees = (0..params.n_trees.max(1))
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(tree_seed(params.seed, t));
                let bootstrap: Vec<usize> = (0..rows.len())
                    .map(|_| rows[rng.gen_range(0..rows.len())])
                    .collect();
                DecisionTree::fit(x, y, &bootstrap, &params.tree, &mut rng)
            })
            .collect();
        Self {
            trees,
            n_features: x.ncols(),
        }
    }

    /// Mean of per-tree normalized impurity decrease, renormalized to sum 1.
    /// All zeros when no tree found an informative split.
    pub fn feature_importances(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.n_features];
        for tree in &self.trees {
            for (acc, v) in out.iter_mut().zip(tree.feature_importances()) {
                *acc += v;
            }
        }
        let total: f64 = out.iter().sum();
        if total > 0.0 {
            out.iter_mut().for_each(|v| *v /= total);
        }
        out
    }

    pub fn predict_proba(&self, row: ArrayView1<'_, f64>) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| t.predict_proba(row)).sum();
        sum / self.trees.len() as f64
    }

    pub fn predict(&self, row: ArrayView1<'_, f64>) -> u8 {
        u8::from(self.predict_proba(row) >= 0.5)
    }

    /// Share of `rows` predicted correctly; `None` for an empty set.
    pub fn accuracy(&self, x: ArrayView2<'_, f64>, y: &[u8], rows: &[usize]) -> Option<f64> {
        if rows.is_empty() {
            return None;
        }
        let correct = rows
            .iter()
            .filter(|&&i| self.predict(x.row(i)) == y[i])
            .count();
        Some(correct as f64 / rows.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }
}
