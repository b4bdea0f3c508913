//! Persisted model artifacts.
//!
//! An artifact wraps an opaque [`TreeEnsemble`] state with everything a
//! consumer needs to use it safely:
//! - the class-name table (index = class id, length = declared class count)
//! - the feature schema the model was trained on
//! - an append-only provenance trail (who produced it, when, and how)
//!
//! Artifacts are JSON files written atomically (temp file, then rename), so a
//! reader never observes a partial artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::TreeEnsemble;
use crate::error::{FedError, Result};

/// Schema version of the artifact envelope.
pub const ARTIFACT_VERSION: u32 = 1;

/// Process that wrote a provenance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Producer {
    CentralTrainer,
    ClientUpdater,
    Aggregator,
}

/// One entry of an artifact's provenance trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub producer: Producer,
    pub created_at: DateTime<Utc>,
    /// Short machine-readable tag of the training path taken.
    pub event: String,
    pub trained_rows: usize,
    /// `(original class id, dense class id)` pairs applied before training.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_remap: Option<Vec<(usize, usize)>>,
    /// Set when this step replaced the model with a different class count.
    #[serde(default)]
    pub class_count_changed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ProvenanceRecord {
    pub fn new(producer: Producer, event: impl Into<String>, trained_rows: usize) -> Self {
        Self {
            producer,
            created_at: Utc::now(),
            event: event.into(),
            trained_rows,
            class_remap: None,
            class_count_changed: false,
            note: None,
        }
    }
}

/// A serialized classifier plus its schema and provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact<M> {
    pub version: u32,
    pub classes: Vec<String>,
    pub feature_names: Vec<String>,
    pub provenance: Vec<ProvenanceRecord>,
    pub model: M,
}

impl<M: TreeEnsemble> ModelArtifact<M> {
    pub fn new(
        model: M,
        classes: Vec<String>,
        feature_names: Vec<String>,
        record: ProvenanceRecord,
    ) -> Self {
        Self {
            version: ARTIFACT_VERSION,
            classes,
            feature_names,
            provenance: vec![record],
            model,
        }
    }

    /// Declared class count, falling back to the class-name table.
    pub fn num_class(&self) -> usize {
        self.model
            .declared_num_class()
            .unwrap_or(self.classes.len())
    }

    pub fn latest_record(&self) -> Option<&ProvenanceRecord> {
        self.provenance.last()
    }

    /// Save atomically, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| FedError::Artifact {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        write_atomic(path, &json)
    }

    /// Load an artifact. A missing file is `NotFound`; anything that does
    /// not decode as this model family is `Artifact`.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|e| FedError::io(path, e))?;
        let artifact: Self = serde_json::from_slice(&data).map_err(|e| FedError::Artifact {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if artifact.version > ARTIFACT_VERSION {
            return Err(FedError::Artifact {
                path: path.to_path_buf(),
                message: format!(
                    "artifact version {} is newer than supported version {ARTIFACT_VERSION}",
                    artifact.version
                ),
            });
        }
        Ok(artifact)
    }
}

/// md5 hex digest of an artifact file, used as its identity in reports.
pub fn digest(path: &Path) -> Result<String> {
    let data = fs::read(path).map_err(|e| FedError::io(path, e))?;
    Ok(format!("{:x}", md5::compute(&data)))
}

/// Copy an artifact byte-for-byte to `dst` (atomic on the destination).
pub fn copy_verbatim(src: &Path, dst: &Path) -> Result<()> {
    let data = fs::read(src).map_err(|e| FedError::io(src, e))?;
    write_atomic(dst, &data)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| FedError::io(parent, e))?;
    }
    let tmp_path = tmp_path_for(path);
    let result = fs::write(&tmp_path, bytes)
        .map_err(|e| FedError::io(&tmp_path, e))
        .and_then(|()| fs::rename(&tmp_path, path).map_err(|e| FedError::io(path, e)));
    if result.is_err() {
        // Best-effort cleanup; the write or rename error is returned.
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
