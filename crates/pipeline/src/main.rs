//! Reco Lab pipeline runner
//!
//! One subcommand per batch stage. Every stage loads its configuration from
//! the environment, runs to completion and exits non-zero on the first
//! error; nothing is retried.

use anyhow::Result;
use clap::{Parser, Subcommand};
use reco_lab_core::{load_dotenv, JsonlTracker, PipelineConfig};
use reco_lab_pipeline::{baseline, dataset, drift, model, report};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reco-pipeline", version, about = "Recommender experimentation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest raw reviews and write the normalized interaction table
    Prepare,
    /// Train and evaluate the popularity baseline
    TrainBaseline,
    /// Train the ALS factor model and persist the artifact
    TrainAls,
    /// Write a drifted copy of the interaction table
    SimulateDrift,
    /// Compare reference vs. drifted tables and render the drift report
    DriftReport,
    /// Answer a batch of recommendation queries from a persisted model
    Recommend {
        /// CSV with a user_id column and optional top_n column
        #[arg(long)]
        queries: PathBuf,
    },
    /// Run every stage in order
    RunAll,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    load_dotenv();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env()?;
    config.validate()?;
    let tracker = JsonlTracker::new(&config.paths.tracking_dir)?;

    match cli.command {
        Command::Prepare => {
            dataset::prepare(&config, &tracker)?;
        }
        Command::TrainBaseline => {
            let rate = baseline::train_baseline(&config, &tracker)?;
            println!("Top-{} hit rate: {:.4}", config.top_n, rate);
        }
        Command::TrainAls => {
            model::train_als(&config, &tracker)?;
        }
        Command::SimulateDrift => {
            drift::simulate_drift(&config, &tracker)?;
        }
        Command::DriftReport => {
            let result = report::drift_report(&config, &tracker)?;
            println!(
                "Dataset drift: {} ({}/{} columns)",
                result.dataset_drift,
                result.drifted_columns,
                result.columns.len()
            );
        }
        Command::Recommend { queries } => {
            let recommender = model::AlsRecommender::load(&config.paths.model)?;
            let batch = model::read_queries(&queries)?;
            let results = recommender.recommend_batch(&batch, config.top_n)?;
            for ranked in results {
                println!("{}", serde_json::to_string(&ranked)?);
            }
        }
        Command::RunAll => {
            dataset::prepare(&config, &tracker)?;
            let rate = baseline::train_baseline(&config, &tracker)?;
            model::train_als(&config, &tracker)?;
            drift::simulate_drift(&config, &tracker)?;
            let result = report::drift_report(&config, &tracker)?;
            info!(
                hit_rate = rate,
                dataset_drift = result.dataset_drift,
                "pipeline complete"
            );
        }
    }

    Ok(())
}
