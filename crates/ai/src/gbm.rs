//! Gradient-boosted regression trees (squared loss, exact greedy splits).
//!
//! Each round fits a depth-limited tree to the residual gradients of the current
//! ensemble on a row subsample and a column subsample, with L1/L2-regularised leaf
//! weights, and adds it shrunk by the learning rate.

use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

use crate::result::{AiError, AiResult};

/// Boosting hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// Fraction of rows drawn (without replacement) for each tree.
    pub subsample: f64,
    /// Fraction of columns drawn for each tree.
    pub colsample_bytree: f64,
    /// L1 penalty on leaf weights.
    pub reg_alpha: f64,
    /// L2 penalty on leaf weights.
    pub reg_lambda: f64,
    /// Minimum hessian (sample count under squared loss) per child.
    pub min_child_weight: f64,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 6,
            learning_rate: 0.1,
            subsample: 0.8,
            colsample_bytree: 0.8,
            reg_alpha: 0.01,
            reg_lambda: 1.0,
            min_child_weight: 1.0,
            seed: 42,
        }
    }
}

impl BoostingParams {
    fn validate(&self) -> AiResult<()> {
        let fraction = |v: f64| v > 0.0 && v <= 1.0;
        if self.n_estimators == 0 {
            return Err(AiError::InvalidInput("n_estimators must be > 0".to_string()));
        }
        if !fraction(self.subsample) || !fraction(self.colsample_bytree) {
            return Err(AiError::InvalidInput(
                "subsample and colsample_bytree must be in (0, 1]".to_string(),
            ));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 || self.reg_lambda < 0.0 || self.reg_alpha < 0.0 {
            return Err(AiError::InvalidInput(
                "learning_rate must be > 0 and penalties >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
    },
    /// Rows with `x[feature] < threshold` go left.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut at = 0;
        loop {
            match &self.nodes[at] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => at = if row[*feature] < *threshold { *left } else { *right },
            }
        }
    }

    pub fn leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf { .. })).count()
    }
}

/// Fitted ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedRegressor {
    n_features: usize,
    base_score: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoostedRegressor {
    pub fn fit(rows: &[Vec<f64>], targets: &[f64], params: &BoostingParams) -> AiResult<Self> {
        params.validate()?;
        if rows.is_empty() || rows.len() != targets.len() {
            return Err(AiError::InvalidInput(format!(
                "{} rows for {} targets",
                rows.len(),
                targets.len()
            )));
        }
        let n_features = rows[0].len();
        if n_features == 0 || rows.iter().any(|r| r.len() != n_features) {
            return Err(AiError::InvalidInput("ragged or empty feature matrix".to_string()));
        }
        if rows.iter().flatten().chain(targets).any(|v| !v.is_finite()) {
            return Err(AiError::InvalidInput("non-finite value in training data".to_string()));
        }

        let base_score = targets.iter().sum::<f64>() / targets.len() as f64;
        let mut predictions = vec![base_score; rows.len()];
        let mut rng = SmallRng::seed_from_u64(params.seed);

        let n_rows_per_tree = sample_size(rows.len(), params.subsample);
        let n_cols_per_tree = sample_size(n_features, params.colsample_bytree);

        let mut trees = Vec::with_capacity(params.n_estimators);
        for _ in 0..params.n_estimators {
            let mut row_idx = sample(&mut rng, rows.len(), n_rows_per_tree).into_vec();
            row_idx.sort_unstable();
            let mut columns = sample(&mut rng, n_features, n_cols_per_tree).into_vec();
            columns.sort_unstable();

            let gradients: Vec<f64> = predictions.iter().zip(targets).map(|(p, y)| p - y).collect();

            let mut builder = TreeBuilder {
                rows,
                gradients: &gradients,
                columns: &columns,
                params,
                nodes: Vec::new(),
            };
            builder.grow(row_idx, 0);
            let tree = RegressionTree { nodes: builder.nodes };

            for (p, row) in predictions.iter_mut().zip(rows) {
                *p += tree.predict(row);
            }
            trees.push(tree);
        }

        Ok(Self {
            n_features,
            base_score,
            trees,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn predict_row(&self, row: &[f64]) -> AiResult<f64> {
        if row.len() != self.n_features {
            return Err(AiError::InvalidInput(format!(
                "model expects {} features, got {}",
                self.n_features,
                row.len()
            )));
        }
        Ok(self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>())
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> AiResult<Vec<f64>> {
        rows.iter().map(|r| self.predict_row(r)).collect()
    }
}

fn sample_size(n: usize, fraction: f64) -> usize {
    ((n as f64 * fraction).round() as usize).clamp(1, n)
}

/// L1 soft-thresholding of the gradient sum.
fn soft_threshold(g: f64, alpha: f64) -> f64 {
    if g > alpha {
        g - alpha
    } else if g < -alpha {
        g + alpha
    } else {
        0.0
    }
}

struct TreeBuilder<'a> {
    rows: &'a [Vec<f64>],
    gradients: &'a [f64],
    columns: &'a [usize],
    params: &'a BoostingParams,
    nodes: Vec<Node>,
}

struct BestSplit {
    gain: f64,
    feature: usize,
    threshold: f64,
}

impl TreeBuilder<'_> {
    /// Structure score of a node with gradient sum `g` and hessian sum `h`.
    fn score(&self, g: f64, h: f64) -> f64 {
        let t = soft_threshold(g, self.params.reg_alpha);
        t * t / (h + self.params.reg_lambda)
    }

    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        -soft_threshold(g, self.params.reg_alpha) / (h + self.params.reg_lambda) * self.params.learning_rate
    }

    /// Grow the subtree for `idx` and return its node index.
    fn grow(&mut self, idx: Vec<usize>, depth: usize) -> usize {
        let g: f64 = idx.iter().map(|&i| self.gradients[i]).sum();
        let h = idx.len() as f64;

        let split = if depth < self.params.max_depth {
            self.best_split(&idx, g, h)
        } else {
            None
        };

        let Some(split) = split else {
            self.nodes.push(Node::Leaf {
                value: self.leaf_value(g, h),
            });
            return self.nodes.len() - 1;
        };

        let at = self.nodes.len();
        self.nodes.push(Node::Leaf { value: 0.0 });
        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = idx
            .into_iter()
            .partition(|&i| self.rows[i][split.feature] < split.threshold);
        let left = self.grow(left_idx, depth + 1);
        let right = self.grow(right_idx, depth + 1);
        self.nodes[at] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        at
    }

    fn best_split(&self, idx: &[usize], g: f64, h: f64) -> Option<BestSplit> {
        let min_child = self.params.min_child_weight;
        if idx.len() < 2 || h < 2.0 * min_child {
            return None;
        }
        let parent = self.score(g, h);
        let mut best: Option<BestSplit> = None;
        let mut order = idx.to_vec();

        for &feature in self.columns {
            order.sort_by(|&a, &b| self.rows[a][feature].total_cmp(&self.rows[b][feature]));

            let (mut gl, mut hl) = (0.0, 0.0);
            for k in 0..order.len() - 1 {
                let i = order[k];
                gl += self.gradients[i];
                hl += 1.0;

                let here = self.rows[i][feature];
                let next = self.rows[order[k + 1]][feature];
                if here == next {
                    continue;
                }
                let hr = h - hl;
                if hl < min_child || hr < min_child {
                    continue;
                }
                let gain = self.score(gl, hl) + self.score(g - gl, hr) - parent;
                if gain > 1e-12 && best.as_ref().is_none_or(|b| gain > b.gain) {
                    best = Some(BestSplit {
                        gain,
                        feature,
                        threshold: here + (next - here) / 2.0,
                    });
                }
            }
        }
        best
    }
}
