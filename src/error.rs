//! Error taxonomy shared by the client updater, the aggregator and the
//! central trainer.
//!
//! Only fatal conditions live here. Warm-start incompatibilities and class
//! mismatches are [`TrainError`] variants that the client updater recovers
//! from locally; they reach this type only when no fallback applies.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::TrainError;

/// Fatal errors surfaced to the caller / process boundary.
#[derive(Debug, Error)]
pub enum FedError {
    /// Required input file, directory or dataset is absent, or the
    /// aggregation candidate set is empty after filtering.
    #[error("not found: {0}")]
    NotFound(String),

    /// Feature or label shapes are inconsistent with what the model expects.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Invalid caller-supplied settings (weights, paths, thresholds).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A model artifact exists but could not be decoded.
    #[error("artifact decode error ({}): {message}", path.display())]
    Artifact { path: PathBuf, message: String },

    #[error("I/O error ({}): {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FedError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound(path.display().to_string());
        }
        Self::Io { path, source }
    }

    /// Short kind label used in log fields and test assertions.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::SchemaMismatch(_) => "SchemaMismatch",
            Self::Configuration(_) => "Configuration",
            Self::Artifact { .. } => "Artifact",
            Self::Io { .. } => "Io",
        }
    }
}

impl From<TrainError> for FedError {
    fn from(err: TrainError) -> Self {
        match err {
            TrainError::Schema(msg) => Self::SchemaMismatch(msg),
            // Reaching here means no fallback chain applied to this call site.
            TrainError::ClassMismatch { expected, found } => Self::SchemaMismatch(format!(
                "label set incompatible with model: expected {expected} classes, found {found}"
            )),
            TrainError::Compatibility(msg) => {
                Self::Configuration(format!("training backend rejected request: {msg}"))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, FedError>;
