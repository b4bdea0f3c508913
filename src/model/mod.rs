//! Tree-ensemble classifier capability.
//!
//! The client updater and aggregator never look inside a model. They drive it
//! through the narrow [`TreeEnsemble`] interface:
//!
//! - `train`: fit from scratch with a [`HyperParams`] set
//! - `continue_train`: warm start from the model's current state
//! - `predict_class_probabilities`: one probability row per input row
//! - serde `Serialize` / `Deserialize`: persisted inside a [`ModelArtifact`]
//!
//! [`GradientBoostedClassifier`] is the bundled backend.

pub mod artifact;
pub mod gbdt;

pub use artifact::{ModelArtifact, Producer, ProvenanceRecord, ARTIFACT_VERSION};
pub use gbdt::GradientBoostedClassifier;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Training errors
// ============================================================================

/// Errors raised by a training backend.
///
/// The first two variants have documented recovery paths in the client
/// updater; `Schema` is always fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrainError {
    /// The backend cannot honour the requested option for this model state
    /// (e.g. warm start from a state written by another format version).
    #[error("warm start not supported: {0}")]
    Compatibility(String),

    /// The label set cannot be absorbed by the existing model in place.
    #[error("class mismatch: model declares {expected} classes, labels provide {found}")]
    ClassMismatch { expected: usize, found: usize },

    /// Row width, label count or label range is inconsistent.
    #[error("{0}")]
    Schema(String),
}

// ============================================================================
// Hyperparameters
// ============================================================================

/// Loss the ensemble is fit against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Objective {
    /// Softmax cross-entropy, outputs a probability per class.
    #[default]
    #[serde(rename = "multi:softprob")]
    MultiSoftprob,
}

/// The one named hyperparameter profile.
///
/// Central training and the class-mismatch rebuild in the client updater both
/// read it from the loaded configuration so the two never drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingProfile {
    /// Boosting rounds per `train` / `continue_train` call.
    pub n_estimators: usize,
    pub learning_rate: f64,
    /// Shallow trees keep client-side fine-tuning fast.
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Seed for every shuffle the pipeline performs.
    pub seed: u64,
    pub objective: Objective,
}

impl TrainingProfile {
    pub const DEFAULT: Self = Self {
        n_estimators: 50,
        learning_rate: 0.2,
        max_depth: 4,
        min_samples_leaf: 1,
        seed: 42,
        objective: Objective::MultiSoftprob,
    };

    /// Bind the profile to a class count.
    pub fn with_classes(self, num_class: usize) -> HyperParams {
        HyperParams {
            profile: self,
            num_class,
        }
    }
}

impl Default for TrainingProfile {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Profile plus the declared class count of one concrete model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    pub profile: TrainingProfile,
    pub num_class: usize,
}

// ============================================================================
// Capability trait
// ============================================================================

/// Opaque tree-ensemble classifier.
///
/// Implementations own their tree structure entirely; callers only see
/// probabilities and the declared class count.
pub trait TreeEnsemble: Clone + Serialize + DeserializeOwned {
    /// Fit a new model from scratch.
    fn train(params: &HyperParams, rows: &[Vec<f64>], labels: &[usize]) -> Result<Self, TrainError>;

    /// Continue training from this model's current state.
    fn continue_train(&self, rows: &[Vec<f64>], labels: &[usize]) -> Result<Self, TrainError>;

    /// One probability vector (length = class count) per input row.
    fn predict_class_probabilities(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, TrainError>;

    /// Class count declared at construction, if the backend records one.
    fn declared_num_class(&self) -> Option<usize>;

    /// Hyperparameters this model was built with.
    fn hyper_params(&self) -> HyperParams;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_matches_documented_values() {
        let p = TrainingProfile::default();
        assert_eq!(p.n_estimators, 50);
        assert!((p.learning_rate - 0.2).abs() < f64::EPSILON);
        assert_eq!(p.max_depth, 4);
        assert_eq!(p.objective, Objective::MultiSoftprob);
    }

    #[test]
    fn objective_serializes_with_library_name() {
        let json = serde_json::to_string(&Objective::MultiSoftprob).unwrap();
        assert_eq!(json, "\"multi:softprob\"");
    }

    #[test]
    fn partial_profile_fills_defaults() {
        let p: TrainingProfile = toml::from_str("max_depth = 2").unwrap();
        assert_eq!(p.max_depth, 2);
        assert_eq!(p.n_estimators, TrainingProfile::DEFAULT.n_estimators);
    }
}
