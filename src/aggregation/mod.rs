//! Aggregator
//!
//! Reduces a directory of candidate model artifacts to one representative
//! artifact that becomes the next central model.
//!
//! ## Strategy
//!
//! This is a selection step, not parameter averaging. Tree ensembles are
//! not blended; the chosen candidate is copied byte-for-byte to the output.
//!
//! - **Weighted**: highest normalized weight, ties to the newest file
//! - **Most recent**: newest file, weights ignored. This is what a run
//!   without weights does; recency stands in for trust and is a known
//!   simplification.
//!
//! Negative or non-finite weights anywhere in the supplied set are rejected
//! before any candidate is loaded. Candidates that fail to decode are then
//! skipped with a warning and their weights are dropped before
//! renormalization.

pub mod selection;

pub use selection::{
    aggregate, check_weight_entries, normalize_weights, select_representative, uniform_weights,
    Candidate, Selection, SelectionPolicy,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

use crate::config::FedConfig;
use crate::error::{FedError, Result};
use crate::model::artifact::{copy_verbatim, digest};
use crate::model::{ModelArtifact, TreeEnsemble};

/// Directory aggregation request.
#[derive(Debug, Clone)]
pub struct AggregationJob {
    pub model_dir: PathBuf,
    pub output: PathBuf,
    /// File extension of candidate artifacts, without the dot.
    pub extension: String,
    /// Raw weights aligned with the sorted candidate file names.
    pub weights: Option<Vec<f64>>,
    pub policy: SelectionPolicy,
}

impl AggregationJob {
    pub fn from_config(cfg: &FedConfig) -> Self {
        Self {
            model_dir: cfg.aggregation.model_dir.clone(),
            output: cfg.aggregation.output.clone(),
            extension: cfg.aggregation.extension.clone(),
            weights: cfg.aggregation.weights.clone(),
            policy: cfg.aggregation.policy,
        }
    }
}

/// What an aggregation run did.
#[derive(Debug, Clone, Serialize)]
pub struct AggregationSummary {
    pub considered: usize,
    pub loaded: usize,
    pub skipped: Vec<PathBuf>,
    pub chosen: PathBuf,
    pub chosen_modified: DateTime<Utc>,
    pub digest: String,
    /// Normalized weight of the chosen candidate among the loaded ones.
    pub weight: f64,
    pub policy: SelectionPolicy,
    pub output: PathBuf,
}

impl std::fmt::Display for AggregationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "╔════════════════════════════════════════════════════════════╗")?;
        writeln!(f, "║                    MODEL AGGREGATION                       ║")?;
        writeln!(f, "╚════════════════════════════════════════════════════════════╝")?;
        writeln!(f, "  Candidates considered : {}", self.considered)?;
        writeln!(f, "  Loaded / skipped      : {} / {}", self.loaded, self.skipped.len())?;
        for path in &self.skipped {
            writeln!(f, "    skipped: {}", path.display())?;
        }
        writeln!(f, "  Policy                : {}", self.policy)?;
        writeln!(f, "  Chosen                : {}", self.chosen.display())?;
        writeln!(f, "  Modified              : {}", self.chosen_modified.to_rfc3339())?;
        writeln!(f, "  md5                   : {}", self.digest)?;
        writeln!(f, "  Weight                : {:.4}", self.weight)?;
        writeln!(f, "  Output                : {}", self.output.display())?;
        write!(
            f,
            "  Note: representative selected and copied verbatim; no parameter averaging performed"
        )
    }
}

/// Candidate artifact files in `dir`, sorted by file name. `exclude` (the
/// aggregation output) is never a candidate.
pub fn scan_candidates(dir: &Path, extension: &str, exclude: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(FedError::NotFound(format!("model directory {}", dir.display())));
    }
    let entries = std::fs::read_dir(dir).map_err(|e| FedError::io(dir, e))?;
    let excluded = exclude.canonicalize().ok();

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Unreadable directory entry, skipping");
                None
            }
        })
        .filter(|path| path.is_file())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(extension))
        .filter(|path| {
            path != exclude
                && (excluded.is_none() || path.canonicalize().ok() != excluded)
        })
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Scan, load, select and copy. Returns the summary that was logged.
pub fn aggregate_directory<M: TreeEnsemble>(job: &AggregationJob) -> Result<AggregationSummary> {
    let files = scan_candidates(&job.model_dir, &job.extension, &job.output)?;
    info!(
        dir = %job.model_dir.display(),
        candidates = files.len(),
        "Scanning for candidate models"
    );
    if files.is_empty() {
        return Err(FedError::NotFound(format!(
            "no models to aggregate in {}",
            job.model_dir.display()
        )));
    }

    if let Some(weights) = &job.weights {
        if weights.len() != files.len() {
            return Err(FedError::Configuration(format!(
                "{} weights supplied for {} candidate files",
                weights.len(),
                files.len()
            )));
        }
        // Zero-sum is checked after skipping, over the loaded candidates only.
        check_weight_entries(weights)?;
    }

    let mut candidates = Vec::new();
    let mut kept_weights = Vec::new();
    let mut skipped = Vec::new();
    for (i, path) in files.iter().enumerate() {
        match ModelArtifact::<M>::load(path) {
            Ok(artifact) => {
                info!(
                    file = %path.display(),
                    classes = artifact.num_class(),
                    "Loaded candidate"
                );
                candidates.push(Candidate {
                    name: file_name(path),
                    modified: modified_time(path),
                    value: path.clone(),
                });
                if let Some(weights) = &job.weights {
                    kept_weights.push(weights[i]);
                }
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Skipping undecodable candidate");
                skipped.push(path.clone());
            }
        }
    }

    let weights = job.weights.as_ref().map(|_| kept_weights.as_slice());
    let selection = aggregate(&candidates, weights, job.policy)?;
    let chosen = &candidates[selection.index];

    copy_verbatim(&chosen.value, &job.output)?;
    let summary = AggregationSummary {
        considered: files.len(),
        loaded: candidates.len(),
        skipped,
        chosen: chosen.value.clone(),
        chosen_modified: DateTime::<Utc>::from(chosen.modified),
        digest: digest(&job.output)?,
        weight: selection.weight,
        policy: selection.policy,
        output: job.output.clone(),
    };

    info!(
        chosen = %chosen.name,
        weight = selection.weight,
        policy = %selection.policy,
        output = %job.output.display(),
        "✓ Aggregated model saved"
    );
    info!("\n{summary}");
    Ok(summary)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Modification time, or the epoch (oldest possible) when it cannot be read.
fn modified_time(path: &Path) -> SystemTime {
    match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(e) => {
            warn!(
                file = %path.display(),
                error = %e,
                "Modification time unavailable, treating candidate as oldest"
            );
            SystemTime::UNIX_EPOCH
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_filters_extension_and_output() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.json", "a.json", "notes.txt", "aggregated_model.json"] {
            std::fs::write(dir.path().join(name), "{}").unwrap();
        }
        let files =
            scan_candidates(dir.path(), "json", &dir.path().join("aggregated_model.json")).unwrap();
        let names: Vec<String> = files.iter().map(|p| file_name(p)).collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }

    #[test]
    fn unreadable_mtime_sorts_as_oldest() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(modified_time(&dir.path().join("gone.json")), SystemTime::UNIX_EPOCH);

        let present = dir.path().join("here.json");
        std::fs::write(&present, "{}").unwrap();
        assert!(modified_time(&present) > SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn missing_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan_candidates(&dir.path().join("nope"), "json", Path::new("x.json")).unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }
}
