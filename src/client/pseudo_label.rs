//! Confidence-filtered pseudo-labels.
//!
//! A row becomes a pseudo-label when the model's arg-max probability for it
//! meets the confidence threshold. Rows whose predicted class falls outside
//! the model's declared class range are dropped afterwards.

use serde::Serialize;

/// Arg-max summary of one probability row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RowPrediction {
    pub class_index: usize,
    pub confidence: f64,
}

impl RowPrediction {
    /// Arg-max of a probability row. The first maximum wins ties; `NaN`
    /// entries are never selected. `None` for an empty or all-`NaN` row.
    pub fn from_probabilities(probs: &[f64]) -> Option<Self> {
        let mut best: Option<Self> = None;
        for (class_index, &p) in probs.iter().enumerate() {
            if p.is_nan() {
                continue;
            }
            if best.map_or(true, |b| p > b.confidence) {
                best = Some(Self {
                    class_index,
                    confidence: p,
                });
            }
        }
        best
    }
}

/// Rows kept as training targets, with their predicted class.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PseudoLabelSet {
    /// Indices into the source dataset.
    pub rows: Vec<usize>,
    pub labels: Vec<usize>,
}

impl PseudoLabelSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drop entries whose class is outside `[0, num_classes)`.
    pub fn retain_valid_classes(self, num_classes: usize) -> Self {
        let (rows, labels) = self
            .rows
            .into_iter()
            .zip(self.labels)
            .filter(|&(_, y)| y < num_classes)
            .unzip();
        Self { rows, labels }
    }
}

/// Summarise every probability row.
pub fn summarize(probabilities: &[Vec<f64>]) -> Vec<Option<RowPrediction>> {
    probabilities
        .iter()
        .map(|p| RowPrediction::from_probabilities(p))
        .collect()
}

/// Keep exactly the rows whose arg-max probability is `>= threshold`.
pub fn select_confident(predictions: &[Option<RowPrediction>], threshold: f64) -> PseudoLabelSet {
    let mut set = PseudoLabelSet::default();
    for (row, pred) in predictions.iter().enumerate() {
        if let Some(pred) = pred {
            if pred.confidence >= threshold {
                set.rows.push(row);
                set.labels.push(pred.class_index);
            }
        }
    }
    set
}
