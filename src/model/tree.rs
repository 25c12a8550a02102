//! CART classification tree on Gini impurity, recording impurity decrease per feature.

use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::index;

/// Splits must reduce weighted impurity by more than this to be kept.
const MIN_DECREASE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    /// Candidate features drawn per split
    pub max_features: usize,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        positive_rate: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    /// Normalized to sum 1, or all zero when the tree never split
    importances: Vec<f64>,
}

struct Candidate {
    feature: usize,
    threshold: f64,
    /// n_left * gini_left + n_right * gini_right
    child_impurity: f64,
}

struct Builder<'a, 'x> {
    x: ArrayView2<'x, f64>,
    y: &'a [u8],
    params: &'a TreeParams,
    rng: &'a mut StdRng,
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

fn gini(positives: usize, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = positives as f64 / n as f64;
    2.0 * p * (1.0 - p)
}

impl DecisionTree {
    /// Fit on the given row indices (duplicates allowed, as in a bootstrap sample).
    pub fn fit(
        x: ArrayView2<'_, f64>,
        y: &[u8],
        samples: &[usize],
        params: &TreeParams,
        rng: &mut StdRng,
    ) -> Self {
        let mut builder = Builder {
            x,
            y,
            params,
            rng,
            nodes: Vec::new(),
            importances: vec![0.0; x.ncols()],
        };
        if !samples.is_empty() {
            builder.grow(samples.to_vec(), 0);
        } else {
            builder.nodes.push(Node::Leaf { positive_rate: 0.0 });
        }
        let mut importances = builder.importances;
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }
        Self {
            nodes: builder.nodes,
            importances,
        }
    }

    /// Fraction of positive training samples in the leaf the row falls into.
    pub fn predict_proba(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut i = 0;
        loop {
            match self.nodes[i] {
                Node::Leaf { positive_rate } => return positive_rate,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => i = if row[feature] <= threshold { left } else { right },
            }
        }
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl Builder<'_, '_> {
    fn grow(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let n = samples.len();
        let positives = samples.iter().filter(|&&i| self.y[i] == 1).count();
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            positive_rate: positives as f64 / n as f64,
        });

        let impurity = gini(positives, n);
        if depth >= self.params.max_depth || n < self.params.min_samples_split || impurity == 0.0
        {
            return id;
        }
        let Some(split) = self.best_split(&samples, positives, impurity) else {
            return id;
        };

        self.importances[split.feature] += n as f64 * impurity - split.child_impurity;
        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&i| self.x[[i, split.feature]] <= split.threshold);
        let left = self.grow(left, depth + 1);
        let right = self.grow(right, depth + 1);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    fn best_split(&mut self, samples: &[usize], positives: usize, impurity: f64) -> Option<Candidate> {
        let width = self.x.ncols();
        if width == 0 {
            return None;
        }
        let k = self.params.max_features.clamp(1, width);
        let mut features = index::sample(&mut *self.rng, width, k).into_vec();
        features.sort_unstable();

        let n = samples.len();
        let parent = n as f64 * impurity;
        let mut best: Option<Candidate> = None;
        let mut column: Vec<(f64, u8)> = Vec::with_capacity(n);

        for feature in features {
            column.clear();
            column.extend(samples.iter().map(|&i| (self.x[[i, feature]], self.y[i])));
            column.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_n = 0usize;
            let mut left_pos = 0usize;
            for w in 0..n - 1 {
                left_n += 1;
                left_pos += column[w].1 as usize;
                if column[w].0 == column[w + 1].0 {
                    continue;
                }
                let right_n = n - left_n;
                let child = left_n as f64 * gini(left_pos, left_n)
                    + right_n as f64 * gini(positives - left_pos, right_n);
                if parent - child > MIN_DECREASE
                    && best.as_ref().map_or(true, |b| child < b.child_impurity)
                {
                    best = Some(Candidate {
                        feature,
                        threshold: (column[w].0 + column[w + 1].0) / 2.0,
                        child_impurity: child,
                    });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    fn params(max_features: usize) -> TreeParams {
        TreeParams {
            max_depth: 4,
            min_samples_split: 2,
            max_features,
        }
    }

    #[test]
    fn separable_feature_gets_all_importance() {
        // column 0 separates the classes, column 1 is constant
        let x = array![[0.0, 5.0], [1.0, 5.0], [2.0, 5.0], [10.0, 5.0], [11.0, 5.0], [12.0, 5.0]];
        let y: [u8; 6] = [0, 0, 0, 1, 1, 1];
        let mut rng = StdRng::seed_from_u64(1);
        let tree = DecisionTree::fit(x.view(), &y, &[0, 1, 2, 3, 4, 5], &params(2), &mut rng);
        assert_eq!(tree.feature_importances(), &[1.0, 0.0]);
        assert_eq!(tree.node_count(), 3);
        assert_eq!(tree.predict_proba(x.row(0)), 0.0);
        assert_eq!(tree.predict_proba(x.row(5)), 1.0);
        assert_eq!(tree.predict_proba(array![6.5, 0.0].view()), 1.0);
    }

    #[test]
    fn pure_node_is_a_leaf() {
        let x = array![[1.0], [2.0]];
        let y: [u8; 2] = [1, 1];
        let mut rng = StdRng::seed_from_u64(1);
        let tree = DecisionTree::fit(x.view(), &y, &[0, 1], &params(1), &mut rng);
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.feature_importances(), &[0.0]);
    }

    #[test]
    fn refits_share_one_view_with_short_lived_rngs() {
        let data = array![[0.0], [1.0], [2.0], [3.0]];
        let x = data.view();
        let y: [u8; 4] = [0, 0, 1, 1];
        let trees: Vec<DecisionTree> = (0..3u64)
            .map(|seed| {
                let mut rng = StdRng::seed_from_u64(seed);
                DecisionTree::fit(x, &y, &[0, 1, 2, 3], &params(1), &mut rng)
            })
            .collect();
        assert!(trees.iter().all(|t| t.feature_importances() == [1.0]));
    }

    #[test]
    fn depth_limit_is_respected() {
        // XOR-like labels need depth 2; with depth 0 the root stays a leaf.
        let x = array![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
        let y: [u8; 4] = [0, 1, 1, 0];
        let mut rng = StdRng::seed_from_u64(3);
        let p = TreeParams {
            max_depth: 0,
            ..params(2)
        };
        let tree = DecisionTree::fit(x.view(), &y, &[0, 1, 2, 3], &p, &mut rng);
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.predict_proba(x.row(0)), 0.5);
    }
}
