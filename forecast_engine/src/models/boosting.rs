//! Second-order gradient boosted regression trees
//!
//! Trees are grown depth-first with exact greedy splits scored by the
//! regularised gain on gradient and hessian sums. For squared error every
//! hessian is 1, so hessian sums are row counts and `min_child_weight`
//! is a minimum leaf size.

use crate::budget::FitBudget;
use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use series_math::stats::mean;

/// Booster hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoosterParams {
    /// Number of boosting rounds (trees)
    pub n_estimators: usize,
    /// Maximum depth of each tree
    pub max_depth: usize,
    /// Shrinkage applied to every leaf weight
    pub learning_rate: f64,
    /// L2 penalty on leaf weights
    pub reg_lambda: f64,
    /// Minimum hessian sum in each child of a split
    pub min_child_weight: f64,
    /// Minimum gain for a split to be kept
    pub gamma: f64,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 6,
            learning_rate: 0.3,
            reg_lambda: 1.0,
            min_child_weight: 1.0,
            gamma: 0.0,
        }
    }
}

impl BoosterParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(ForecastError::InvalidParameter(
                "n_estimators must be positive".to_string(),
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(ForecastError::InvalidParameter(format!(
                "learning_rate must be in (0, 1], got {}",
                self.learning_rate
            )));
        }
        if self.reg_lambda < 0.0 || self.min_child_weight < 0.0 || self.gamma < 0.0 {
            return Err(ForecastError::InvalidParameter(
                "reg_lambda, min_child_weight and gamma must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn predict(&self, row: &[f64]) -> f64 {
        match self {
            Node::Leaf { value } => *value,
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if row[*feature] < *threshold {
                    left.predict(row)
                } else {
                    right.predict(row)
                }
            }
        }
    }

    fn depth(&self) -> usize {
        match self {
            Node::Leaf { .. } => 0,
            Node::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Grows one tree on fixed gradients
struct TreeBuilder<'a> {
    features: &'a [Vec<f64>],
    gradients: &'a [f64],
    params: &'a BoosterParams,
}

impl TreeBuilder<'_> {
    fn score(&self, gradient_sum: f64, hessian_sum: f64) -> f64 {
        gradient_sum * gradient_sum / (hessian_sum + self.params.reg_lambda)
    }

    fn leaf(&self, rows: &[usize]) -> Node {
        let gradient_sum: f64 = rows.iter().map(|&i| self.gradients[i]).sum();
        let hessian_sum = rows.len() as f64;
        Node::Leaf {
            value: -gradient_sum / (hessian_sum + self.params.reg_lambda) * self.params.learning_rate,
        }
    }

    fn build(&self, rows: Vec<usize>, depth: usize) -> Node {
        if depth >= self.params.max_depth || rows.len() < 2 {
            return self.leaf(&rows);
        }
        let Some(split) = self.best_split(&rows) else {
            return self.leaf(&rows);
        };

        let (left, right): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&i| self.features[i][split.feature] < split.threshold);
        Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(self.build(left, depth + 1)),
            right: Box::new(self.build(right, depth + 1)),
        }
    }

    fn best_split(&self, rows: &[usize]) -> Option<BestSplit> {
        let gradient_total: f64 = rows.iter().map(|&i| self.gradients[i]).sum();
        let hessian_total = rows.len() as f64;
        let parent = self.score(gradient_total, hessian_total);
        let feature_count = self.features.first().map_or(0, Vec::len);

        let mut best: Option<BestSplit> = None;
        let mut order = rows.to_vec();
        for feature in 0..feature_count {
            order.sort_by(|&a, &b| self.features[a][feature].total_cmp(&self.features[b][feature]));

            let mut gradient_left = 0.0;
            for (position, pair) in order.windows(2).enumerate() {
                gradient_left += self.gradients[pair[0]];
                let here = self.features[pair[0]][feature];
                let next = self.features[pair[1]][feature];
                if here == next {
                    continue;
                }

                let hessian_left = (position + 1) as f64;
                let hessian_right = hessian_total - hessian_left;
                if hessian_left < self.params.min_child_weight
                    || hessian_right < self.params.min_child_weight
                {
                    continue;
                }

                let gain = 0.5
                    * (self.score(gradient_left, hessian_left)
                        + self.score(gradient_total - gradient_left, hessian_right)
                        - parent)
                    - self.params.gamma;
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(BestSplit {
                        feature,
                        threshold: here + (next - here) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// Ensemble of regression trees fitted to squared error
#[derive(Debug, Clone)]
pub struct GradientBooster {
    base_score: f64,
    trees: Vec<Node>,
}

impl GradientBooster {
    /// Fit `targets` from row-major `features`
    pub fn fit(
        features: &[Vec<f64>],
        targets: &[f64],
        params: &BoosterParams,
        budget: &FitBudget,
    ) -> Result<Self> {
        params.validate()?;
        if features.len() != targets.len() || features.is_empty() {
            return Err(ForecastError::InvalidParameter(format!(
                "Booster needs equally many feature rows ({}) and targets ({}), at least one",
                features.len(),
                targets.len()
            )));
        }
        let width = features[0].len();
        if features.iter().any(|row| row.len() != width) {
            return Err(ForecastError::InvalidParameter(
                "Every feature row must have the same length".to_string(),
            ));
        }

        let base_score = mean(targets).unwrap_or(0.0);
        let mut predictions = vec![base_score; targets.len()];
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            budget.check("gradient boosting")?;

            let gradients: Vec<f64> = predictions
                .iter()
                .zip(targets)
                .map(|(p, y)| p - y)
                .collect();
            let builder = TreeBuilder {
                features,
                gradients: &gradients,
                params,
            };
            let tree = builder.build((0..targets.len()).collect(), 0);
            for (prediction, row) in predictions.iter_mut().zip(features) {
                *prediction += tree.predict(row);
            }
            trees.push(tree);
        }

        Ok(Self { base_score, trees })
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Depth of the deepest tree
    pub fn max_depth(&self) -> usize {
        self.trees.iter().map(Node::depth).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits_step_function() {
        let features: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let targets: Vec<f64> = (0..20).map(|i| if i < 10 { 1.0 } else { 5.0 }).collect();
        let booster =
            GradientBooster::fit(&features, &targets, &BoosterParams::default(), &FitBudget::unbounded())
                .unwrap();
        assert!((booster.predict_row(&[3.0]) - 1.0).abs() < 0.05);
        assert!((booster.predict_row(&[15.0]) - 5.0).abs() < 0.05);
        assert_eq!(booster.n_trees(), 100);
    }

    #[test]
    fn test_depth_limit() {
        let features: Vec<Vec<f64>> = (0..64).map(|i| vec![i as f64, (i % 7) as f64]).collect();
        let targets: Vec<f64> = (0..64).map(|i| (i as f64 * 0.3).sin()).collect();
        let params = BoosterParams {
            max_depth: 2,
            n_estimators: 5,
            ..BoosterParams::default()
        };
        let booster = GradientBooster::fit(&features, &targets, &params, &FitBudget::unbounded()).unwrap();
        assert!(booster.max_depth() <= 2);
    }

    #[test]
    fn test_constant_target_predicts_mean() {
        let features: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64]).collect();
        let booster = GradientBooster::fit(
            &features,
            &[3.0; 5],
            &BoosterParams::default(),
            &FitBudget::unbounded(),
        )
        .unwrap();
        assert_eq!(booster.predict_row(&[100.0]), 3.0);
        assert_eq!(booster.max_depth(), 0);
    }

    #[test]
    fn test_interrupted_by_deadline() {
        let features = vec![vec![0.0], vec![1.0]];
        let budget = FitBudget::with_timeout(std::time::Duration::ZERO);
        let err = GradientBooster::fit(&features, &[0.0, 1.0], &BoosterParams::default(), &budget)
            .unwrap_err();
        assert!(matches!(err, ForecastError::Interrupted(_)));
    }
}
