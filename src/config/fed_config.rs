//! `FedConfig` and its TOML sections.
//!
//! Every field has a default, so a config file only needs the keys it
//! changes:
//!
//! ```toml
//! [training]
//! n_estimators = 30
//!
//! [aggregation]
//! weights = [120.0, 80.0, 200.0]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;
use crate::aggregation::SelectionPolicy;
use crate::model::TrainingProfile;

// ============================================================================
// Top level
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FedConfig {
    /// Shared hyperparameter profile for central training and for the
    /// class-mismatch rebuild in the client updater.
    pub training: TrainingProfile,
    pub client: ClientConfig,
    pub aggregation: AggregationConfig,
    pub central: CentralConfig,
}

impl FedConfig {
    /// Load configuration using the standard search order:
    ///
    /// 1. `$FEDBOOST_CONFIG` environment variable
    /// 2. `./fedboost.toml`
    /// 3. Built-in defaults
    ///
    /// A file that fails to load is logged and skipped.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from {}", defaults::CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", defaults::CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", defaults::CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(defaults::CONFIG_FILE_NAME);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./{}", defaults::CONFIG_FILE_NAME);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", defaults::CONFIG_FILE_NAME);
                }
            }
        }

        info!("No {} found, using built-in defaults", defaults::CONFIG_FILE_NAME);
        Self::default()
    }

    /// Load from a specific TOML file path. Unknown keys are warned about,
    /// invalid values are an error.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, err) => ConfigError::Parse(path.to_path_buf(), err),
            other => other,
        })
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }
        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Check every value, collecting all violations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        let t = &self.training;

        if t.n_estimators == 0 {
            errors.push("training.n_estimators must be at least 1".to_string());
        }
        if !(t.learning_rate.is_finite() && t.learning_rate > 0.0) {
            errors.push(format!(
                "training.learning_rate must be positive, got {}",
                t.learning_rate
            ));
        }
        if t.max_depth == 0 {
            errors.push("training.max_depth must be at least 1".to_string());
        }
        if t.min_samples_leaf == 0 {
            errors.push("training.min_samples_leaf must be at least 1".to_string());
        }

        let threshold = self.client.confidence_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            errors.push(format!(
                "client.confidence_threshold must be in (0, 1], got {threshold}"
            ));
        }
        if self.client.model_candidates.contains(&self.client.output) {
            errors.push(format!(
                "client.output ({}) must differ from every client.model_candidates entry",
                self.client.output.display()
            ));
        }

        if let Some(weights) = &self.aggregation.weights {
            if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                errors.push("aggregation.weights must be finite and non-negative".to_string());
            } else if weights.iter().sum::<f64>() <= 0.0 {
                errors.push("aggregation.weights must not sum to zero".to_string());
            }
        }
        if self.aggregation.extension.is_empty() || self.aggregation.extension.starts_with('.') {
            errors.push(format!(
                "aggregation.extension must be a bare extension like \"json\", got {:?}",
                self.aggregation.extension
            ));
        }

        if !(0.0..1.0).contains(&self.central.test_fraction) {
            errors.push(format!(
                "central.test_fraction must be in [0, 1), got {}",
                self.central.test_fraction
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Sections
// ============================================================================

/// `[client]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub confidence_threshold: f64,
    /// Input artifacts tried in order when none is given explicitly.
    pub model_candidates: Vec<PathBuf>,
    pub dataset: PathBuf,
    pub output: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: defaults::CONFIDENCE_THRESHOLD,
            model_candidates: defaults::CLIENT_MODEL_CANDIDATES
                .iter()
                .map(PathBuf::from)
                .collect(),
            dataset: PathBuf::from(defaults::CLIENT_DATASET),
            output: PathBuf::from(defaults::CLIENT_OUTPUT),
        }
    }
}

/// `[aggregation]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub model_dir: PathBuf,
    pub output: PathBuf,
    pub extension: String,
    /// Raw weights aligned with candidate files in sorted name order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
    pub policy: SelectionPolicy,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from(defaults::AGGREGATION_MODEL_DIR),
            output: PathBuf::from(defaults::AGGREGATION_OUTPUT),
            extension: defaults::AGGREGATION_EXTENSION.to_string(),
            weights: None,
            policy: SelectionPolicy::Auto,
        }
    }
}

/// `[central]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralConfig {
    pub data_dir: PathBuf,
    pub part_prefix: String,
    pub test_fraction: f64,
    pub output: PathBuf,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(defaults::CENTRAL_DATA_DIR),
            part_prefix: defaults::CENTRAL_PART_PREFIX.to_string(),
            test_fraction: defaults::CENTRAL_TEST_FRACTION,
            output: PathBuf::from(defaults::CENTRAL_OUTPUT),
        }
    }
}
