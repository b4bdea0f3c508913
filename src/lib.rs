//! fedboost: federated update loop for a tabular tree-ensemble classifier
//!
//! A central model is trained once on pooled data, fine-tuned independently at
//! each client (supervised when the local data is labeled, confidence-filtered
//! pseudo-labels when it is not), and the client models are reduced back to a
//! single representative by the aggregator.
//!
//! ## Architecture
//!
//! - **Central Trainer** (`central`): one-shot fit over `part-*.csv` partitions
//! - **Client Updater** (`client`): path selection, pseudo-label filtering,
//!   dense class remapping, warm-start fallback chains
//! - **Aggregator** (`aggregation`): representative selection by weight or
//!   recency, verbatim copy to the aggregate output
//! - **Model** (`model`): the `TreeEnsemble` capability, the bundled
//!   gradient-boosted backend, and the on-disk artifact contract

pub mod aggregation;
pub mod central;
pub mod client;
pub mod config;
pub mod dataset;
pub mod error;
pub mod model;

// Re-export configuration
pub use config::FedConfig;

// Re-export errors
pub use error::{FedError, Result};

// Re-export model capability and artifacts
pub use model::{
    GradientBoostedClassifier, HyperParams, ModelArtifact, Producer, ProvenanceRecord, TrainError,
    TrainingProfile, TreeEnsemble,
};

// Re-export the three pipeline stages
pub use aggregation::{aggregate_directory, AggregationJob, AggregationSummary, SelectionPolicy};
pub use central::{run_central, CentralJob, CentralReport};
pub use client::{run_update, update, UpdateJob, UpdateOptions, UpdateOutcome, UpdateReport};

pub use dataset::Dataset;
