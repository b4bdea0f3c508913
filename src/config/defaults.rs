//! Default constants.
//!
//! Grouped by subsystem. `FedConfig::default()` and the serde field defaults
//! read from here.

// ============================================================================
// Configuration file
// ============================================================================

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "FEDBOOST_CONFIG";

/// Config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "fedboost.toml";

// ============================================================================
// Client Updater
// ============================================================================

/// Minimum arg-max probability for a row to be used as a pseudo-label.
pub const CONFIDENCE_THRESHOLD: f64 = 0.95;

/// Input artifacts tried in order when no explicit model path is given.
pub const CLIENT_MODEL_CANDIDATES: &[&str] = &[
    "model/client_updated_model.json",
    "model/Central_model.json",
    "Central_model.json",
];

pub const CLIENT_DATASET: &str = "client_data/client_data.csv";

/// Must differ from every candidate above.
pub const CLIENT_OUTPUT: &str = "model/client_updated_model2.json";

// ============================================================================
// Aggregator
// ============================================================================

pub const AGGREGATION_MODEL_DIR: &str = "model";

pub const AGGREGATION_OUTPUT: &str = "model/aggregated_model.json";

pub const AGGREGATION_EXTENSION: &str = "json";

/// Normalized weights closer than this are treated as tied.
pub const WEIGHT_TIE_EPSILON: f64 = 1e-12;

// ============================================================================
// Central Trainer
// ============================================================================

pub const CENTRAL_DATA_DIR: &str = "data";

pub const CENTRAL_PART_PREFIX: &str = "part-";

/// Share of each class held out for evaluation.
pub const CENTRAL_TEST_FRACTION: f64 = 0.2;

pub const CENTRAL_OUTPUT: &str = "Central_model.json";
