//! Multiclass gradient-boosted regression trees.
//!
//! Softmax cross-entropy boosting: every round fits one regression tree per
//! class to the pseudo-residuals `1[y == k] - p_k`, then applies a Newton
//! leaf correction. Splits are exact greedy MSE splits over all rows.
//!
//! Missing values (`NaN`) always route to the right child.
//!
//! This is the in-crate stand-in behind [`TreeEnsemble`]. Nothing outside
//! `model` depends on it directly; a binding to an external boosting library
//! replaces it by implementing the same trait for its own state type.
//!
//! A decoded state is checked for structural consistency before it is used,
//! so a corrupted artifact surfaces as `Schema` instead of a panic.
//!
//! ## Warm start
//!
//! `continue_train` resumes boosting from the stored raw scores. It requires
//! - a state written by the current [`FORMAT_VERSION`] (else `Compatibility`)
//! - a label set that is exactly `0..num_class` (else `ClassMismatch`)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use super::{HyperParams, TrainError, TreeEnsemble};

/// Serialization format of the boosted state. Warm start is only possible
/// from a state written by this exact version.
pub const FORMAT_VERSION: u32 = 2;

/// Floor applied to class priors before taking the log.
const PRIOR_FLOOR: f64 = 1e-8;

// ============================================================================
// Regression tree
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn leaf_index(&self, row: &[f64]) -> usize {
        let mut idx = 0;
        while let Some(Node::Split {
            feature,
            threshold,
            left,
            right,
        }) = self.nodes.get(idx)
        {
            idx = if row[*feature] <= *threshold { *left } else { *right };
        }
        idx
    }

    fn predict(&self, row: &[f64]) -> f64 {
        match self.nodes.get(self.leaf_index(row)) {
            Some(Node::Leaf { value }) => *value,
            _ => 0.0,
        }
    }
}

struct TreeBuilder<'a> {
    rows: &'a [Vec<f64>],
    residuals: &'a [f64],
    n_features: usize,
    max_depth: usize,
    min_samples_leaf: usize,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn build(mut self) -> RegressionTree {
        let all: Vec<usize> = (0..self.rows.len()).collect();
        self.grow(&all, 0);
        RegressionTree { nodes: self.nodes }
    }

    fn push_leaf(&mut self, indices: &[usize]) -> usize {
        let value = if indices.is_empty() {
            0.0
        } else {
            indices.iter().map(|&i| self.residuals[i]).sum::<f64>() / indices.len() as f64
        };
        self.nodes.push(Node::Leaf { value });
        self.nodes.len() - 1
    }

    fn grow(&mut self, indices: &[usize], depth: usize) -> usize {
        if depth >= self.max_depth || indices.len() < 2 || indices.len() <= self.min_samples_leaf {
            return self.push_leaf(indices);
        }

        let Some((feature, threshold)) = self.best_split(indices) else {
            return self.push_leaf(indices);
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .copied()
            .partition(|&i| self.rows[i][feature] <= threshold);
        if left_idx.is_empty() || right_idx.is_empty() {
            return self.push_leaf(indices);
        }

        let node = self.nodes.len();
        self.nodes.push(Node::Leaf { value: 0.0 }); // placeholder
        let left = self.grow(&left_idx, depth + 1);
        let right = self.grow(&right_idx, depth + 1);
        self.nodes[node] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        node
    }

    /// Best `(feature, threshold)` by weighted-MSE decrease.
    fn best_split(&self, indices: &[usize]) -> Option<(usize, f64)> {
        let n = indices.len();
        let mut best: Option<(usize, f64)> = None;
        let mut best_decrease = 1e-12;

        for feature in 0..self.n_features {
            let mut pairs: Vec<(f64, f64)> = indices
                .iter()
                .map(|&i| (self.rows[i][feature], self.residuals[i]))
                .collect();
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

            let total_sum: f64 = pairs.iter().map(|p| p.1).sum();
            let total_sq: f64 = pairs.iter().map(|p| p.1 * p.1).sum();
            let parent = total_sq - total_sum * total_sum / n as f64;

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for i in 0..n - 1 {
                left_sum += pairs[i].1;
                left_sq += pairs[i].1 * pairs[i].1;
                let left_n = i + 1;
                let right_n = n - left_n;
                if left_n < self.min_samples_leaf || right_n < self.min_samples_leaf {
                    continue;
                }
                let threshold = (pairs[i].0 + pairs[i + 1].0) / 2.0;
                // Equal neighbours, or a boundary against NaN / infinity.
                if pairs[i].0 == pairs[i + 1].0 || !threshold.is_finite() {
                    continue;
                }

                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let children = (left_sq - left_sum * left_sum / left_n as f64)
                    + (right_sq - right_sum * right_sum / right_n as f64);
                let decrease = parent - children;
                if decrease > best_decrease {
                    best_decrease = decrease;
                    best = Some((feature, threshold));
                }
            }
        }
        best
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Softmax gradient-boosted tree classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostedClassifier {
    format_version: u32,
    params: HyperParams,
    n_features: usize,
    /// Initial raw score per class (log prior).
    base_scores: Vec<f64>,
    /// `num_class` trees per round, ordered by class within a round.
    trees: Vec<RegressionTree>,
}

impl GradientBoostedClassifier {
    pub fn num_features(&self) -> usize {
        self.n_features
    }

    /// Completed boosting rounds.
    pub fn num_rounds(&self) -> usize {
        self.trees.len() / self.params.num_class.max(1)
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    fn raw_scores(&self, row: &[f64]) -> Vec<f64> {
        let mut scores = self.base_scores.clone();
        let k = self.params.num_class.max(1);
        for round in self.trees.chunks(k) {
            for (class, tree) in round.iter().enumerate() {
                scores[class] += self.params.profile.learning_rate * tree.predict(row);
            }
        }
        scores
    }

    fn check_rows(&self, rows: &[Vec<f64>]) -> Result<(), TrainError> {
        check_width(rows, self.n_features)
    }

    /// Structural consistency of a decoded state. Every split references an
    /// existing feature and points strictly forward, so traversal is bounded.
    fn check_state(&self) -> Result<(), TrainError> {
        let k = self.params.num_class;
        if k == 0 || self.base_scores.len() != k {
            return Err(TrainError::Schema(format!(
                "model state has {} base scores for {k} classes",
                self.base_scores.len()
            )));
        }
        if self.trees.len() % k != 0 {
            return Err(TrainError::Schema(format!(
                "model state has {} trees, not a multiple of {k} classes",
                self.trees.len()
            )));
        }
        for (t, tree) in self.trees.iter().enumerate() {
            for (idx, node) in tree.nodes.iter().enumerate() {
                if let Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } = node
                {
                    if *feature >= self.n_features {
                        return Err(TrainError::Schema(format!(
                            "tree {t} node {idx} splits on feature {feature}, model has {}",
                            self.n_features
                        )));
                    }
                    let forward = |child: usize| child > idx && child < tree.nodes.len();
                    if !forward(*left) || !forward(*right) {
                        return Err(TrainError::Schema(format!(
                            "tree {t} node {idx} has invalid children ({left}, {right})"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Run `n_estimators` rounds on top of `scores`, appending trees.
    fn boost(&mut self, rows: &[Vec<f64>], labels: &[usize], scores: &mut [Vec<f64>]) {
        let k = self.params.num_class;
        let profile = self.params.profile;
        let newton = (k as f64 - 1.0) / k as f64;

        for _ in 0..profile.n_estimators {
            let probs: Vec<Vec<f64>> = scores.iter().map(|s| softmax(s)).collect();
            for class in 0..k {
                let residuals: Vec<f64> = labels
                    .iter()
                    .zip(&probs)
                    .map(|(&y, p)| f64::from(u8::from(y == class)) - p[class])
                    .collect();

                let mut tree = TreeBuilder {
                    rows,
                    residuals: &residuals,
                    n_features: self.n_features,
                    max_depth: profile.max_depth,
                    min_samples_leaf: profile.min_samples_leaf,
                    nodes: Vec::new(),
                }
                .build();
                apply_newton_correction(&mut tree, rows, &residuals, newton);

                for (row, score) in rows.iter().zip(scores.iter_mut()) {
                    score[class] += profile.learning_rate * tree.predict(row);
                }
                self.trees.push(tree);
            }
        }
    }
}

impl TreeEnsemble for GradientBoostedClassifier {
    fn train(params: &HyperParams, rows: &[Vec<f64>], labels: &[usize]) -> Result<Self, TrainError> {
        check_training_input(rows, labels)?;
        if params.num_class == 0 {
            return Err(TrainError::Schema("num_class must be at least 1".into()));
        }
        if let Some(&bad) = labels.iter().find(|&&y| y >= params.num_class) {
            return Err(TrainError::Schema(format!(
                "label {bad} outside [0, {})",
                params.num_class
            )));
        }
        let n_features = rows[0].len();
        check_width(rows, n_features)?;

        let mut counts = vec![0usize; params.num_class];
        for &y in labels {
            counts[y] += 1;
        }
        let base_scores: Vec<f64> = counts
            .iter()
            .map(|&c| (c as f64 / labels.len() as f64).clamp(PRIOR_FLOOR, 1.0).ln())
            .collect();

        let mut model = Self {
            format_version: FORMAT_VERSION,
            params: *params,
            n_features,
            base_scores: base_scores.clone(),
            trees: Vec::new(),
        };
        let mut scores = vec![base_scores; rows.len()];
        model.boost(rows, labels, &mut scores);
        Ok(model)
    }

    fn continue_train(&self, rows: &[Vec<f64>], labels: &[usize]) -> Result<Self, TrainError> {
        if self.format_version != FORMAT_VERSION {
            return Err(TrainError::Compatibility(format!(
                "state written by format v{}, backend is v{FORMAT_VERSION}",
                self.format_version
            )));
        }
        self.check_state()?;
        check_training_input(rows, labels)?;
        self.check_rows(rows)?;

        let distinct: BTreeSet<usize> = labels.iter().copied().collect();
        let dense = distinct.len() == self.params.num_class
            && distinct.iter().enumerate().all(|(i, &y)| i == y);
        if !dense {
            return Err(TrainError::ClassMismatch {
                expected: self.params.num_class,
                found: distinct.len(),
            });
        }

        let mut model = self.clone();
        let mut scores: Vec<Vec<f64>> = rows.iter().map(|r| self.raw_scores(r)).collect();
        model.boost(rows, labels, &mut scores);
        Ok(model)
    }

    fn predict_class_probabilities(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, TrainError> {
        self.check_state()?;
        self.check_rows(rows)?;
        Ok(rows.iter().map(|r| softmax(&self.raw_scores(r))).collect())
    }

    fn declared_num_class(&self) -> Option<usize> {
        Some(self.params.num_class)
    }

    fn hyper_params(&self) -> HyperParams {
        self.params
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn check_training_input(rows: &[Vec<f64>], labels: &[usize]) -> Result<(), TrainError> {
    if rows.is_empty() {
        return Err(TrainError::Schema("no training rows".into()));
    }
    if rows.len() != labels.len() {
        return Err(TrainError::Schema(format!(
            "{} feature rows but {} labels",
            rows.len(),
            labels.len()
        )));
    }
    Ok(())
}

fn check_width(rows: &[Vec<f64>], n_features: usize) -> Result<(), TrainError> {
    match rows.iter().position(|r| r.len() != n_features) {
        Some(i) => Err(TrainError::Schema(format!(
            "row {i} has {} features, expected {n_features}",
            rows[i].len()
        ))),
        None => Ok(()),
    }
}

fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|&s| (s - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|&e| e / sum).collect()
}

/// Leaf value `(K-1)/K * sum(r) / sum(|r| * (1 - |r|))`.
fn apply_newton_correction(
    tree: &mut RegressionTree,
    rows: &[Vec<f64>],
    residuals: &[f64],
    factor: f64,
) {
    let mut sums: HashMap<usize, (f64, f64)> = HashMap::new();
    for (row, &r) in rows.iter().zip(residuals) {
        let entry = sums.entry(tree.leaf_index(row)).or_insert((0.0, 0.0));
        entry.0 += r;
        entry.1 += (r.abs() * (1.0 - r.abs())).max(1e-8);
    }
    for (leaf, (sum_r, sum_w)) in sums {
        if let Some(Node::Leaf { value }) = tree.nodes.get_mut(leaf) {
            *value = factor * sum_r / sum_w;
        }
    }
}
