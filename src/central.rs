//! Central Trainer
//!
//! One-shot fit over pooled, partitioned training data. Produces the initial
//! artifact every client update starts from.
//!
//! 1. Load every `<prefix>*.csv` in the data directory (sorted) and concatenate
//! 2. Encode labels as sorted distinct values
//! 3. Stratified hold-out split, seeded from the training profile
//! 4. Fit with the shared profile, report hold-out accuracy, save

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::client::RowPrediction;
use crate::config::FedConfig;
use crate::dataset::Dataset;
use crate::error::{FedError, Result};
use crate::model::{ModelArtifact, Producer, ProvenanceRecord, TrainingProfile, TreeEnsemble};

#[derive(Debug, Clone)]
pub struct CentralJob {
    pub data_dir: PathBuf,
    pub part_prefix: String,
    /// Fraction of each class held out for evaluation, in `[0, 1)`.
    pub test_fraction: f64,
    pub output: PathBuf,
    pub profile: TrainingProfile,
}

impl CentralJob {
    pub fn from_config(cfg: &FedConfig) -> Self {
        Self {
            data_dir: cfg.central.data_dir.clone(),
            part_prefix: cfg.central.part_prefix.clone(),
            test_fraction: cfg.central.test_fraction,
            output: cfg.central.output.clone(),
            profile: cfg.training,
        }
    }
}

/// Hold-out evaluation of the central fit.
#[derive(Debug, Clone, Serialize)]
pub struct HoldoutEval {
    pub train_rows: usize,
    pub test_rows: usize,
    /// `None` when nothing was held out.
    pub accuracy: Option<f64>,
    /// `confusion[actual][predicted]`.
    pub confusion: Vec<Vec<usize>>,
}

impl HoldoutEval {
    /// Recall per class, `None` for classes absent from the hold-out set.
    pub fn per_class_recall(&self) -> Vec<Option<f64>> {
        self.confusion
            .iter()
            .enumerate()
            .map(|(class, row)| {
                let total: usize = row.iter().sum();
                (total > 0).then(|| row[class] as f64 / total as f64)
            })
            .collect()
    }
}

/// Result of [`run_central`].
#[derive(Debug, Clone, Serialize)]
pub struct CentralReport {
    pub parts: Vec<PathBuf>,
    pub rows: usize,
    pub classes: Vec<String>,
    pub eval: HoldoutEval,
    pub output: PathBuf,
}

/// Partition files `<prefix>*.csv` in `dir`, sorted by name.
pub fn find_parts(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| FedError::io(dir, e))?;
    let mut parts: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("csv"))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix))
        })
        .collect();
    parts.sort();
    Ok(parts)
}

/// Split row indices into `(train, test)`, holding out `test_fraction` of
/// every class. Each class keeps at least one training row.
pub fn stratified_split(labels: &[usize], test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &y) in labels.iter().enumerate() {
        by_class.entry(y).or_default().push(i);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for (_, mut idx) in by_class {
        idx.shuffle(&mut rng);
        let n_test = ((idx.len() as f64 * test_fraction).round() as usize).min(idx.len() - 1);
        test.extend_from_slice(&idx[..n_test]);
        train.extend_from_slice(&idx[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

/// Fit a central model on a labeled dataset and evaluate it on a stratified
/// hold-out split.
pub fn train_central<M: TreeEnsemble>(
    data: &Dataset,
    profile: &TrainingProfile,
    test_fraction: f64,
) -> Result<(ModelArtifact<M>, HoldoutEval)> {
    if !(0.0..1.0).contains(&test_fraction) {
        return Err(FedError::Configuration(format!(
            "test fraction {test_fraction} outside [0, 1)"
        )));
    }
    if !data.is_labeled() {
        return Err(FedError::SchemaMismatch(
            "central training data has no label column".into(),
        ));
    }
    let classes = data.distinct_labels();
    let labels = data.encode_labels(&classes)?;
    let (train_idx, test_idx) = stratified_split(&labels, test_fraction, profile.seed);

    let train_rows = data.select_rows(&train_idx);
    let train_labels: Vec<usize> = train_idx.iter().map(|&i| labels[i]).collect();
    info!(
        rows = data.len(),
        train = train_idx.len(),
        test = test_idx.len(),
        classes = classes.len(),
        n_estimators = profile.n_estimators,
        max_depth = profile.max_depth,
        "Training central model"
    );
    let model = M::train(&profile.with_classes(classes.len()), &train_rows, &train_labels)?;

    let mut confusion = vec![vec![0usize; classes.len()]; classes.len()];
    if !test_idx.is_empty() {
        let probs = model.predict_class_probabilities(&data.select_rows(&test_idx))?;
        for (&i, p) in test_idx.iter().zip(&probs) {
            if let Some(pred) = RowPrediction::from_probabilities(p) {
                if pred.class_index < classes.len() {
                    confusion[labels[i]][pred.class_index] += 1;
                }
            }
        }
    }
    let correct: usize = (0..classes.len()).map(|c| confusion[c][c]).sum();
    let accuracy = (!test_idx.is_empty()).then(|| correct as f64 / test_idx.len() as f64);

    let record = ProvenanceRecord::new(Producer::CentralTrainer, "central_fit", train_idx.len());
    let artifact = ModelArtifact::new(model, classes, data.feature_names.clone(), record);
    let eval = HoldoutEval {
        train_rows: train_idx.len(),
        test_rows: test_idx.len(),
        accuracy,
        confusion,
    };
    Ok((artifact, eval))
}

/// Load the partitions, train, evaluate, save.
pub fn run_central<M: TreeEnsemble>(job: &CentralJob) -> Result<CentralReport> {
    if !job.data_dir.is_dir() {
        return Err(FedError::NotFound(format!(
            "data directory {}",
            job.data_dir.display()
        )));
    }
    let parts = find_parts(&job.data_dir, &job.part_prefix)?;
    if parts.is_empty() {
        return Err(FedError::NotFound(format!(
            "no {}*.csv files in {}",
            job.part_prefix,
            job.data_dir.display()
        )));
    }
    info!(dir = %job.data_dir.display(), parts = parts.len(), "📂 Loading training partitions");

    let datasets = parts
        .iter()
        .map(|p| Dataset::from_csv(p))
        .collect::<Result<Vec<_>>>()?;
    let data = Dataset::concat(datasets)?;

    let (artifact, eval) = train_central::<M>(&data, &job.profile, job.test_fraction)?;
    match eval.accuracy {
        Some(acc) => info!(accuracy = %format!("{acc:.4}"), test_rows = eval.test_rows, "✅ Hold-out accuracy"),
        None => warn!("No hold-out rows; accuracy not evaluated"),
    }
    for (class, recall) in artifact.classes.iter().zip(eval.per_class_recall()) {
        if let Some(r) = recall {
            info!(class = %class, recall = %format!("{r:.3}"), "Per-class recall");
        }
    }

    artifact.save(&job.output)?;
    info!(output = %job.output.display(), "✓ Central model saved");

    Ok(CentralReport {
        parts,
        rows: data.len(),
        classes: artifact.classes,
        eval,
        output: job.output.clone(),
    })
}
