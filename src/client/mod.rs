//! Client Updater
//!
//! Produces an updated model artifact from the central artifact and one local
//! dataset. The dataset decides the path:
//!
//! - **Supervised** (dataset has a `label` column): warm start on the labeled
//!   rows. A `Compatibility` rejection falls back to a cold retrain with the
//!   central model's hyperparameters.
//! - **Pseudo-label** (no `label` column): predict, keep rows whose arg-max
//!   probability meets the confidence threshold, drop classes outside the
//!   model's declared range, renumber the surviving classes densely, then warm
//!   start. `Compatibility` falls back to a cold retrain; `ClassMismatch`
//!   builds a brand-new model with `num_class = k` from the shared profile.
//!
//! Which branch ran is reported through [`UpdateOutcome`]. Nothing is written
//! to disk until a training result (or the no-op result) is available.

pub mod pseudo_label;
pub mod remap;

pub use pseudo_label::{PseudoLabelSet, RowPrediction};
pub use remap::ClassRemap;

use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{self, defaults, FedConfig};
use crate::dataset::Dataset;
use crate::error::{FedError, Result};
use crate::model::{
    ModelArtifact, Producer, ProvenanceRecord, TrainError, TrainingProfile, TreeEnsemble,
    ARTIFACT_VERSION,
};

// ============================================================================
// Options
// ============================================================================

/// Knobs for one update run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateOptions {
    /// Minimum arg-max probability for a row to become a pseudo-label.
    pub confidence_threshold: f64,
    /// Profile used when a class mismatch forces a brand-new model.
    pub profile: TrainingProfile,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: defaults::CONFIDENCE_THRESHOLD,
            profile: TrainingProfile::DEFAULT,
        }
    }
}

impl UpdateOptions {
    pub fn from_config(cfg: &FedConfig) -> Self {
        Self {
            confidence_threshold: cfg.client.confidence_threshold,
            profile: cfg.training,
        }
    }

    /// Options from the global config if it has been initialised, otherwise
    /// the built-in defaults.
    pub fn current() -> Self {
        if config::is_initialized() {
            Self::from_config(config::get())
        } else {
            Self::default()
        }
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Which adaptation strategy the dataset selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainingPath {
    Supervised,
    PseudoLabel { remap: ClassRemap },
}

/// Why a pseudo-label run trained nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No row reached the confidence threshold.
    BelowThreshold,
    /// Every confident row predicted a class outside the model's range.
    NoValidClasses,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BelowThreshold => write!(f, "no row reached the confidence threshold"),
            Self::NoValidClasses => write!(f, "no confident row predicted a valid class"),
        }
    }
}

/// Result of [`update`], one variant per branch of the fallback chains.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// Warm start succeeded.
    Trained { path: TrainingPath, rows: usize },
    /// Warm start was rejected as incompatible; fit from scratch with the
    /// same hyperparameters and class count.
    RetrainedFresh {
        path: TrainingPath,
        rows: usize,
        reason: String,
    },
    /// Pseudo-labels could not be absorbed by the existing class count; a new
    /// model with `num_class = k` replaced it.
    NewModelDueToClassMismatch {
        remap: ClassRemap,
        rows: usize,
        previous_num_class: usize,
        num_class: usize,
    },
    /// Nothing to train on. The central model is returned unchanged.
    SkippedNoConfidentRows { reason: SkipReason, rows_seen: usize },
}

impl UpdateOutcome {
    pub fn trained_rows(&self) -> usize {
        match self {
            Self::Trained { rows, .. }
            | Self::RetrainedFresh { rows, .. }
            | Self::NewModelDueToClassMismatch { rows, .. } => *rows,
            Self::SkippedNoConfidentRows { .. } => 0,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::SkippedNoConfidentRows { .. })
    }

    /// Remap table used for training, if this was a pseudo-label run that
    /// trained something.
    pub fn remap(&self) -> Option<&ClassRemap> {
        match self {
            Self::Trained {
                path: TrainingPath::PseudoLabel { remap },
                ..
            }
            | Self::RetrainedFresh {
                path: TrainingPath::PseudoLabel { remap },
                ..
            }
            | Self::NewModelDueToClassMismatch { remap, .. } => Some(remap),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Trained { .. } => "trained",
            Self::RetrainedFresh { .. } => "retrained_fresh",
            Self::NewModelDueToClassMismatch { .. } => "new_model_due_to_class_mismatch",
            Self::SkippedNoConfidentRows { .. } => "skipped_no_confident_rows",
        }
    }
}

impl std::fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trained { rows, .. } => write!(f, "warm-started on {rows} rows"),
            Self::RetrainedFresh { rows, reason, .. } => {
                write!(f, "retrained from scratch on {rows} rows ({reason})")
            }
            Self::NewModelDueToClassMismatch {
                rows,
                previous_num_class,
                num_class,
                remap,
            } => write!(
                f,
                "new model with {num_class} classes (was {previous_num_class}) on {rows} rows, remap {remap}"
            ),
            Self::SkippedNoConfidentRows { reason, rows_seen } => {
                write!(f, "nothing to train on among {rows_seen} rows: {reason}")
            }
        }
    }
}

/// Updated artifact plus the branch that produced it.
#[derive(Debug, Clone)]
pub struct UpdateReport<M> {
    pub artifact: ModelArtifact<M>,
    pub outcome: UpdateOutcome,
}

// ============================================================================
// Update
// ============================================================================

/// Adapt `central` to `data`.
///
/// The dataset's feature columns are matched to the artifact's schema by name
/// first. Schema errors are fatal; warm-start incompatibilities and class
/// mismatches are recovered as described in the module docs.
pub fn update<M: TreeEnsemble>(
    central: &ModelArtifact<M>,
    data: &Dataset,
    options: &UpdateOptions,
) -> Result<UpdateReport<M>> {
    let data = data.align_to(&central.feature_names)?;
    if data.is_labeled() {
        update_supervised(central, &data)
    } else {
        update_pseudo_labeled(central, &data, options)
    }
}

fn update_supervised<M: TreeEnsemble>(
    central: &ModelArtifact<M>,
    data: &Dataset,
) -> Result<UpdateReport<M>> {
    let labels = data.encode_labels(&central.classes)?;
    let rows = data.len();
    info!(
        rows,
        classes = central.classes.len(),
        "Supervised path: warm-starting from central model"
    );

    match central.model.continue_train(&data.rows, &labels) {
        Ok(model) => {
            let record = ProvenanceRecord::new(Producer::ClientUpdater, "supervised_warm_start", rows);
            Ok(UpdateReport {
                artifact: successor(central, model, central.classes.clone(), record),
                outcome: UpdateOutcome::Trained {
                    path: TrainingPath::Supervised,
                    rows,
                },
            })
        }
        Err(TrainError::Compatibility(reason)) => {
            warn!(%reason, "Warm start rejected, retraining from scratch with the same hyperparameters");
            let model = M::train(&central.model.hyper_params(), &data.rows, &labels)?;
            let mut record =
                ProvenanceRecord::new(Producer::ClientUpdater, "supervised_cold_retrain", rows);
            record.note = Some(reason.clone());
            Ok(UpdateReport {
                artifact: successor(central, model, central.classes.clone(), record),
                outcome: UpdateOutcome::RetrainedFresh {
                    path: TrainingPath::Supervised,
                    rows,
                    reason,
                },
            })
        }
        Err(e) => Err(e.into()),
    }
}

fn update_pseudo_labeled<M: TreeEnsemble>(
    central: &ModelArtifact<M>,
    data: &Dataset,
    options: &UpdateOptions,
) -> Result<UpdateReport<M>> {
    let probabilities = central.model.predict_class_probabilities(&data.rows)?;
    let predictions = pseudo_label::summarize(&probabilities);
    log_prediction_diagnostics(&probabilities, &predictions);

    let confident = pseudo_label::select_confident(&predictions, options.confidence_threshold);
    if confident.is_empty() {
        info!(
            rows = data.len(),
            threshold = options.confidence_threshold,
            "No confident pseudo-labels, keeping central model unchanged"
        );
        return Ok(skipped(central, SkipReason::BelowThreshold, data.len()));
    }

    let model_classes = central
        .model
        .declared_num_class()
        .or_else(|| probabilities.first().map(Vec::len))
        .unwrap_or_default();
    let confident_count = confident.len();
    let valid = confident.retain_valid_classes(model_classes);
    debug!(
        confident = confident_count,
        valid = valid.len(),
        distinct_after = ?distinct(&valid.labels),
        model_classes,
        "Pseudo-labels after class-validity filter"
    );
    if valid.len() < confident_count {
        warn!(
            dropped = confident_count - valid.len(),
            model_classes,
            "Discarded pseudo-labels outside the model's class range"
        );
    }
    let Some(remap) = ClassRemap::from_labels(&valid.labels) else {
        warn!("All confident pseudo-labels were out of range, keeping central model unchanged");
        return Ok(skipped(central, SkipReason::NoValidClasses, data.len()));
    };

    let labels = remap.apply(&valid.labels).ok_or_else(|| {
        FedError::SchemaMismatch("pseudo-label missing from its own remap table".into())
    })?;
    let rows = data.select_rows(&valid.rows);
    let trained = rows.len();
    info!(
        rows = trained,
        k = remap.k(),
        model_classes,
        remap = %remap,
        identity = remap.is_identity(),
        "Pseudo-label path: remapped classes"
    );

    let record = |event: &str| {
        let mut r = ProvenanceRecord::new(Producer::ClientUpdater, event, trained);
        r.class_remap = Some(remap.pairs());
        r
    };

    match central.model.continue_train(&rows, &labels) {
        Ok(model) => {
            let classes = remap.permuted_names(&central.classes, model_classes);
            Ok(UpdateReport {
                artifact: successor(central, model, classes, record("pseudo_label_warm_start")),
                outcome: UpdateOutcome::Trained {
                    path: TrainingPath::PseudoLabel {
                        remap: remap.clone(),
                    },
                    rows: trained,
                },
            })
        }
        Err(TrainError::Compatibility(reason)) => {
            warn!(%reason, "Warm start rejected, retraining pseudo-labeled rows from scratch");
            let model = M::train(&central.model.hyper_params(), &rows, &labels)?;
            let classes = remap.permuted_names(&central.classes, model_classes);
            let mut r = record("pseudo_label_cold_retrain");
            r.note = Some(reason.clone());
            Ok(UpdateReport {
                artifact: successor(central, model, classes, r),
                outcome: UpdateOutcome::RetrainedFresh {
                    path: TrainingPath::PseudoLabel {
                        remap: remap.clone(),
                    },
                    rows: trained,
                    reason,
                },
            })
        }
        Err(TrainError::ClassMismatch { expected, found }) => {
            let k = remap.k();
            warn!(
                expected,
                found,
                new_num_class = k,
                "Warm start cannot absorb pseudo-label classes, building a new model"
            );
            let model = M::train(&options.profile.with_classes(k), &rows, &labels)?;
            let mut r = record("pseudo_label_new_model");
            r.class_count_changed = true;
            r.note = Some(format!("declared class count {model_classes} -> {k}"));
            Ok(UpdateReport {
                artifact: successor(central, model, remap.observed_names(&central.classes), r),
                outcome: UpdateOutcome::NewModelDueToClassMismatch {
                    remap: remap.clone(),
                    rows: trained,
                    previous_num_class: model_classes,
                    num_class: k,
                },
            })
        }
        Err(e) => Err(e.into()),
    }
}

fn successor<M: TreeEnsemble>(
    central: &ModelArtifact<M>,
    model: M,
    classes: Vec<String>,
    record: ProvenanceRecord,
) -> ModelArtifact<M> {
    let mut provenance = central.provenance.clone();
    provenance.push(record);
    ModelArtifact {
        version: ARTIFACT_VERSION,
        classes,
        feature_names: central.feature_names.clone(),
        provenance,
        model,
    }
}

fn skipped<M: TreeEnsemble>(
    central: &ModelArtifact<M>,
    reason: SkipReason,
    rows_seen: usize,
) -> UpdateReport<M> {
    UpdateReport {
        artifact: central.clone(),
        outcome: UpdateOutcome::SkippedNoConfidentRows { reason, rows_seen },
    }
}

fn distinct(labels: &[usize]) -> BTreeSet<usize> {
    labels.iter().copied().collect()
}

fn log_prediction_diagnostics(probabilities: &[Vec<f64>], predictions: &[Option<RowPrediction>]) {
    let width = probabilities.first().map_or(0, Vec::len);
    let max_confidence = predictions
        .iter()
        .flatten()
        .map(|p| p.confidence)
        .fold(None, |acc: Option<f64>, c| Some(acc.map_or(c, |a| a.max(c))));
    let predicted: Vec<usize> = predictions.iter().flatten().map(|p| p.class_index).collect();
    let distinct_before = distinct(&predicted);
    debug!(
        rows = probabilities.len(),
        width,
        max_confidence = ?max_confidence,
        label_min = ?distinct_before.first(),
        label_max = ?distinct_before.last(),
        distinct_before = ?distinct_before,
        "Prediction diagnostics"
    );
}

// ============================================================================
// File-level job
// ============================================================================

/// Paths and options for one client update run.
#[derive(Debug, Clone)]
pub struct UpdateJob {
    /// Explicit input artifact. When `None`, the first existing entry of
    /// `model_candidates` is used.
    pub model: Option<PathBuf>,
    pub model_candidates: Vec<PathBuf>,
    pub dataset: PathBuf,
    pub output: PathBuf,
    pub options: UpdateOptions,
}

impl UpdateJob {
    pub fn from_config(cfg: &FedConfig) -> Self {
        Self {
            model: None,
            model_candidates: cfg.client.model_candidates.clone(),
            dataset: cfg.client.dataset.clone(),
            output: cfg.client.output.clone(),
            options: UpdateOptions::from_config(cfg),
        }
    }
}

/// Pick the input artifact: the explicit path if given, else the first
/// candidate that exists on disk.
pub fn resolve_model_path(explicit: Option<&Path>, candidates: &[PathBuf]) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(FedError::NotFound(format!("model artifact {}", path.display())))
        };
    }
    candidates
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or_else(|| {
            let tried: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
            FedError::NotFound(format!("no model artifact found (tried {})", tried.join(", ")))
        })
}

/// Load, update, and persist. The output is written even when the update
/// was a no-op, so downstream aggregation always finds an artifact.
pub fn run_update<M: TreeEnsemble>(job: &UpdateJob) -> Result<UpdateReport<M>> {
    let model_path = resolve_model_path(job.model.as_deref(), &job.model_candidates)?;
    if same_location(&model_path, &job.output) {
        return Err(FedError::Configuration(format!(
            "output {} is the input artifact; updating in place is not allowed",
            job.output.display()
        )));
    }
    if !job.dataset.is_file() {
        return Err(FedError::NotFound(format!("dataset {}", job.dataset.display())));
    }

    let central = ModelArtifact::<M>::load(&model_path)?;
    info!(
        model = %model_path.display(),
        classes = central.num_class(),
        features = central.feature_names.len(),
        "Loaded central model"
    );
    let data = Dataset::from_csv(&job.dataset)?;
    info!(
        dataset = %job.dataset.display(),
        rows = data.len(),
        labeled = data.is_labeled(),
        "Loaded client dataset"
    );

    let report = update(&central, &data, &job.options)?;
    report.artifact.save(&job.output)?;
    info!(
        outcome = report.outcome.label(),
        trained_rows = report.outcome.trained_rows(),
        output = %job.output.display(),
        "✓ Client update saved: {}",
        report.outcome
    );
    Ok(report)
}

fn same_location(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
