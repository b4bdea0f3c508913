//! Synthetic Federated Round
//!
//! Generates Gaussian-cluster data and drives one full round of the loop:
//! - central training on partitioned, labeled data
//! - client updates, some labeled and some unlabeled
//! - aggregation of the client models, weighted by client dataset size
//!
//! # Usage
//! ```bash
//! ./federated-round --workdir /tmp/round --clients 4 --labeled-clients 2
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use std::path::{Path, PathBuf};
use tracing::info;

use fedboost::aggregation::{aggregate_directory, AggregationJob, SelectionPolicy};
use fedboost::central::{run_central, CentralJob};
use fedboost::client::{run_update, UpdateJob, UpdateOptions};
use fedboost::config::FedConfig;
use fedboost::dataset::Dataset;
use fedboost::model::GradientBoostedClassifier;

const AGGREGATE_FILE: &str = "aggregated_model.json";

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "federated-round")]
#[command(about = "Run one synthetic central -> clients -> aggregate round")]
#[command(version)]
struct Args {
    /// Directory for generated data and artifacts (created if missing)
    #[arg(long, default_value = "federated_round")]
    workdir: PathBuf,

    /// Number of client updates
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u32).range(1..=50))]
    clients: u32,

    /// How many of the clients receive labeled data
    #[arg(long, default_value = "1")]
    labeled_clients: u32,

    /// Number of classes
    #[arg(long, default_value = "4", value_parser = clap::value_parser!(u32).range(2..=20))]
    classes: u32,

    /// Number of features
    #[arg(long, default_value = "4", value_parser = clap::value_parser!(u32).range(1..=64))]
    features: u32,

    /// Rows per class in each central partition
    #[arg(long, default_value = "40")]
    rows_per_class: u32,

    /// Number of central partition files
    #[arg(long, default_value = "3")]
    partitions: u32,

    /// Random seed
    #[arg(long, default_value = "7")]
    seed: u64,

    /// Config file for the training profile and thresholds
    #[arg(long)]
    config: Option<PathBuf>,
}

// ============================================================================
// Data generation
// ============================================================================

/// One Gaussian blob per class.
struct ClusterGenerator {
    rng: StdRng,
    centers: Vec<Vec<f64>>,
    noise: Normal<f64>,
}

impl ClusterGenerator {
    fn new(classes: usize, features: usize, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let spread = Normal::new(0.0, 8.0).context("center distribution")?;
        let centers = (0..classes)
            .map(|_| (0..features).map(|_| spread.sample(&mut rng)).collect())
            .collect();
        Ok(Self {
            rng,
            centers,
            noise: Normal::new(0.0, 1.0).context("noise distribution")?,
        })
    }

    fn feature_names(&self) -> Vec<String> {
        (0..self.centers[0].len()).map(|i| format!("f{i}")).collect()
    }

    fn class_name(class: usize) -> String {
        format!("class-{class}")
    }

    /// `per_class` rows of each class in `classes`, shuffled.
    fn sample(&mut self, classes: &[usize], per_class: usize, labeled: bool) -> Result<Dataset> {
        let mut rows = Vec::new();
        for &c in classes {
            for _ in 0..per_class {
                let row: Vec<f64> = self.centers[c]
                    .iter()
                    .map(|m| m + self.noise.sample(&mut self.rng))
                    .collect();
                rows.push((row, Self::class_name(c)));
            }
        }
        rows.shuffle(&mut self.rng);
        let (features, labels): (Vec<_>, Vec<_>) = rows.into_iter().unzip();
        Ok(Dataset::from_parts(
            self.feature_names(),
            features,
            labeled.then_some(labels),
        )?)
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let cfg = match &args.config {
        Some(path) => FedConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => FedConfig::load(),
    };

    let classes = args.classes as usize;
    let mut generator = ClusterGenerator::new(classes, args.features as usize, args.seed)?;
    let all_classes: Vec<usize> = (0..classes).collect();

    let data_dir = args.workdir.join("data");
    let model_dir = args.workdir.join("model");
    let client_dir = args.workdir.join("client_data");
    std::fs::create_dir_all(&model_dir)
        .with_context(|| format!("creating {}", model_dir.display()))?;
    let removed = clear_previous_round(&model_dir)?;
    if removed > 0 {
        info!(dir = %model_dir.display(), removed, "Removed client models from a previous round");
    }

    // ---- Central ----
    info!(workdir = %args.workdir.display(), "🚀 Starting synthetic federated round");
    for p in 0..args.partitions {
        let part = generator.sample(&all_classes, args.rows_per_class as usize, true)?;
        part.to_csv(&data_dir.join(format!("part-{p:03}.csv")))?;
    }
    let central_path = args.workdir.join("Central_model.json");
    let central = run_central::<GradientBoostedClassifier>(&CentralJob {
        data_dir,
        part_prefix: "part-".to_string(),
        test_fraction: cfg.central.test_fraction,
        output: central_path.clone(),
        profile: cfg.training,
    })?;

    // ---- Clients ----
    let mut weights = Vec::new();
    for i in 0..args.clients {
        let labeled = i < args.labeled_clients;
        // Unlabeled clients only see part of the class range, which exercises
        // the class remap and, when fewer classes survive, the new-model path.
        let seen: Vec<usize> = if labeled {
            all_classes.clone()
        } else {
            all_classes.iter().copied().filter(|c| (c + i as usize) % 2 == 0).collect()
        };
        let per_class = 20 + 10 * i as usize;
        let data = generator.sample(&seen, per_class, labeled)?;
        let dataset_path = client_dir.join(format!("client_{i:02}.csv"));
        data.to_csv(&dataset_path)?;
        weights.push(data.len() as f64);

        let report = run_update::<GradientBoostedClassifier>(&UpdateJob {
            model: Some(central_path.clone()),
            model_candidates: Vec::new(),
            dataset: dataset_path,
            output: model_dir.join(format!("client_{i:02}.json")),
            options: UpdateOptions::from_config(&cfg),
        })
        .with_context(|| format!("client {i} update failed"))?;
        info!(client = i, labeled, outcome = report.outcome.label(), "Client finished");
    }

    // ---- Aggregate ----
    let summary = aggregate_directory::<GradientBoostedClassifier>(&AggregationJob {
        model_dir: model_dir.clone(),
        output: model_dir.join(AGGREGATE_FILE),
        extension: "json".to_string(),
        weights: Some(weights),
        policy: SelectionPolicy::HighestWeight,
    })?;

    println!("{summary}");
    print_round_footer(&args.workdir, central.eval.accuracy);
    Ok(())
}

/// Delete `client_*.json` and the previous aggregate from `model_dir`, so the
/// candidate set matches this round's weights.
fn clear_previous_round(model_dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(model_dir)
        .with_context(|| format!("reading {}", model_dir.display()))?
    {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let stale = (name.starts_with("client_") && name.ends_with(".json"))
            || name == AGGREGATE_FILE;
        if stale && path.is_file() {
            std::fs::remove_file(&path)
                .with_context(|| format!("removing {}", path.display()))?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn print_round_footer(workdir: &Path, accuracy: Option<f64>) {
    println!();
    match accuracy {
        Some(acc) => println!("  Central hold-out accuracy: {acc:.4}"),
        None => println!("  Central hold-out accuracy: n/a"),
    }
    println!("  Artifacts written under {}", workdir.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn previous_round_models_are_cleared() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["client_00.json", "client_07.json", AGGREGATE_FILE, "notes.json", "client_00.csv"] {
            std::fs::write(dir.path().join(name), "{}").unwrap();
        }

        assert_eq!(clear_previous_round(dir.path()).unwrap(), 3);
        let mut left: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["client_00.csv", "notes.json"]);
    }
}
