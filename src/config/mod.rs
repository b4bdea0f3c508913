//! Configuration Module
//!
//! Paths, thresholds and the shared training profile, loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `FEDBOOST_CONFIG` environment variable (path to TOML file)
//! 2. `fedboost.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! // In main():
//! config::init(FedConfig::load());
//!
//! // Anywhere in the codebase:
//! let threshold = config::get().client.confidence_threshold;
//! ```

mod fed_config;
pub mod defaults;
pub mod validation;

pub use fed_config::*;

use std::sync::OnceLock;

/// Global configuration, initialized once at startup.
static FED_CONFIG: OnceLock<FedConfig> = OnceLock::new();

/// Initialize the global configuration.
///
/// Later calls are ignored with a warning.
pub fn init(config: FedConfig) {
    if FED_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get a reference to the global configuration.
///
/// Panics if `init()` has not been called; a missing config is a startup bug.
pub fn get() -> &'static FedConfig {
    FED_CONFIG
        .get()
        .expect("config::get() called before config::init()")
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    FED_CONFIG.get().is_some()
}
