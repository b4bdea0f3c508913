//! Unknown-key detection with Levenshtein suggestions.
//!
//! Two-pass parse: the raw TOML is first read as a `toml::Value`, its key
//! tree is compared against the known field names, and typos produce
//! warnings with "did you mean?" suggestions. Normal serde deserialization
//! follows. Warnings never reject a config.

use std::collections::HashSet;

/// A non-fatal config warning.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Every valid dotted key path of `FedConfig`.
///
/// Maintained by hand alongside `fed_config.rs`.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [training]
        "training",
        "training.n_estimators",
        "training.learning_rate",
        "training.max_depth",
        "training.min_samples_leaf",
        "training.seed",
        "training.objective",
        // [client]
        "client",
        "client.confidence_threshold",
        "client.model_candidates",
        "client.dataset",
        "client.output",
        // [aggregation]
        "aggregation",
        "aggregation.model_dir",
        "aggregation.output",
        "aggregation.extension",
        "aggregation.weights",
        "aggregation.policy",
        // [central]
        "central",
        "central.data_dir",
        "central.part_prefix",
        "central.test_fraction",
        "central.output",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// Key walking
// ============================================================================

/// Collect every dotted key path in a TOML value, tables included.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Suggestions
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Closest known key within edit distance 3. Ties resolve alphabetically so
/// the suggestion is stable.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (levenshtein(unknown, k), k))
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, k)| k.to_string())
}

// ============================================================================
// Entry point
// ============================================================================

/// Warnings for every key in `raw_toml` that `FedConfig` does not define.
/// Unparseable input yields no warnings; serde reports it afterwards.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}
