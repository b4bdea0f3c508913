//! fedboost - federated tree-ensemble update loop
//!
//! # Usage
//!
//! ```bash
//! # Train the central model from data/part-*.csv
//! fedboost central
//!
//! # Fine-tune at a client (labeled or unlabeled data)
//! fedboost update --dataset client_data/client_data.csv
//!
//! # Pick the representative of model/*.json, weighted by client size
//! fedboost aggregate --weights 120,80,200
//!
//! # Print the effective configuration
//! fedboost show-config
//! ```
//!
//! # Environment Variables
//!
//! - `FEDBOOST_CONFIG`: Path to a TOML config file (default: ./fedboost.toml)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use fedboost::aggregation::{aggregate_directory, AggregationJob, SelectionPolicy};
use fedboost::central::{run_central, CentralJob};
use fedboost::client::{run_update, UpdateJob};
use fedboost::config::{self, FedConfig};
use fedboost::model::GradientBoostedClassifier;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "fedboost")]
#[command(about = "Federated update loop for a tree-ensemble classifier")]
#[command(version)]
struct CliArgs {
    /// Config file (overrides FEDBOOST_CONFIG and ./fedboost.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Train the central model on pooled partition files
    Central {
        /// Directory holding the partition CSVs
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Output artifact path
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Fine-tune a model on local client data
    Update {
        /// Input artifact (default: first existing of [client].model_candidates)
        #[arg(long)]
        model: Option<PathBuf>,
        /// Client dataset CSV
        #[arg(long)]
        dataset: Option<PathBuf>,
        /// Output artifact path; must differ from the input
        #[arg(long)]
        output: Option<PathBuf>,
        /// Pseudo-label confidence threshold
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Select a representative model from a directory of candidates
    Aggregate {
        /// Directory scanned for candidate artifacts
        #[arg(long)]
        model_dir: Option<PathBuf>,
        /// Output artifact path
        #[arg(long)]
        output: Option<PathBuf>,
        /// Weights aligned with candidate files in sorted name order
        #[arg(long, value_delimiter = ',')]
        weights: Option<Vec<f64>>,
        /// Selection policy
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    Auto,
    HighestWeight,
    MostRecent,
}

impl From<PolicyArg> for SelectionPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Auto => Self::Auto,
            PolicyArg::HighestWeight => Self::HighestWeight,
            PolicyArg::MostRecent => Self::MostRecent,
        }
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

    let args = CliArgs::parse();

    let fed_config = match &args.config {
        Some(path) => FedConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => FedConfig::load(),
    };
    config::init(fed_config);
    let cfg = config::get();

    match args.command {
        SubCommand::Central { data_dir, output } => {
            let mut job = CentralJob::from_config(cfg);
            if let Some(dir) = data_dir {
                job.data_dir = dir;
            }
            if let Some(out) = output {
                job.output = out;
            }
            let report = run_central::<GradientBoostedClassifier>(&job)
                .context("central training failed")?;
            info!(
                rows = report.rows,
                classes = report.classes.len(),
                output = %report.output.display(),
                "Central training complete"
            );
        }

        SubCommand::Update {
            model,
            dataset,
            output,
            threshold,
        } => {
            let mut job = UpdateJob::from_config(cfg);
            job.model = model;
            if let Some(ds) = dataset {
                job.dataset = ds;
            }
            if let Some(out) = output {
                job.output = out;
            }
            if let Some(t) = threshold {
                anyhow::ensure!(
                    t > 0.0 && t <= 1.0,
                    "--threshold must be in (0, 1], got {t}"
                );
                job.options.confidence_threshold = t;
            }
            let report = run_update::<GradientBoostedClassifier>(&job)
                .context("client update failed")?;
            println!("{}", serde_json::to_string_pretty(&report.outcome)?);
        }

        SubCommand::Aggregate {
            model_dir,
            output,
            weights,
            policy,
        } => {
            let mut job = AggregationJob::from_config(cfg);
            if let Some(dir) = model_dir {
                job.model_dir = dir;
            }
            if let Some(out) = output {
                job.output = out;
            }
            if weights.is_some() {
                job.weights = weights;
            }
            if let Some(p) = policy {
                job.policy = p.into();
            }
            let summary = aggregate_directory::<GradientBoostedClassifier>(&job)
                .context("aggregation failed")?;
            println!("{summary}");
        }

        SubCommand::ShowConfig => {
            print!("{}", cfg.to_toml().context("serializing config")?);
        }
    }

    Ok(())
}
