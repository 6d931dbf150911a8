//! Configuration loading for the Reco Lab pipeline
//!
//! Every stage receives an explicit [`PipelineConfig`]; there is no
//! process-wide mutable configuration. All environment variables use the
//! `RECO_LAB_` prefix, with defaults for every optional field and `.env`
//! support via dotenvy.
//!
//! # Example
//!
//! ```no_run
//! use reco_lab_core::config::{load_dotenv, PipelineConfig};
//!
//! # fn example() -> Result<(), reco_lab_core::CoreError> {
//! load_dotenv();
//! let config = PipelineConfig::from_env()?;
//! config.validate()?;
//! # Ok(())
//! # }
//! ```

use crate::error::CoreError;
use std::path::PathBuf;

/// Artifact locations for every pipeline stage.
///
/// # Environment Variables
///
/// - `RECO_LAB_RAW_INPUT`: raw gzip NDJSON reviews (default: `data/raw/reviews.json.gz`)
/// - `RECO_LAB_INTERACTIONS`: normalized interaction table (default: `data/processed/interactions.csv`)
/// - `RECO_LAB_DRIFTED_INTERACTIONS`: drifted copy (default: `data/processed/interactions_drifted.csv`)
/// - `RECO_LAB_MODEL_PATH`: serialized factor model (default: `models/als_model.bin`)
/// - `RECO_LAB_TOP_ITEMS`: baseline output (default: `outputs/top_items.txt`)
/// - `RECO_LAB_DRIFT_REPORT`: drift report (default: `outputs/drift_report.html`)
/// - `RECO_LAB_TRACKING_DIR`: experiment tracking sink (default: `outputs/tracking`)
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub raw_input: PathBuf,
    pub interactions: PathBuf,
    pub drifted_interactions: PathBuf,
    pub model: PathBuf,
    pub top_items: PathBuf,
    pub drift_report: PathBuf,
    pub tracking_dir: PathBuf,
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            raw_input: PathBuf::from("data/raw/reviews.json.gz"),
            interactions: PathBuf::from("data/processed/interactions.csv"),
            drifted_interactions: PathBuf::from("data/processed/interactions_drifted.csv"),
            model: PathBuf::from("models/als_model.bin"),
            top_items: PathBuf::from("outputs/top_items.txt"),
            drift_report: PathBuf::from("outputs/drift_report.html"),
            tracking_dir: PathBuf::from("outputs/tracking"),
        }
    }
}

/// ALS training hyperparameters.
///
/// # Environment Variables
///
/// - `RECO_LAB_ALS_FACTORS` (default: 64)
/// - `RECO_LAB_ALS_ITERATIONS` (default: 15)
/// - `RECO_LAB_ALS_REGULARIZATION` (default: 0.1)
/// - `RECO_LAB_ALS_ALPHA` (default: 40.0)
/// - `RECO_LAB_ALS_SEED` (default: 42)
#[derive(Debug, Clone)]
pub struct AlsSettings {
    /// Number of latent factors (embedding dimension)
    pub factors: usize,
    /// Number of alternating optimization sweeps
    pub iterations: usize,
    /// Regularization parameter (lambda)
    pub regularization: f32,
    /// Confidence scaling for implicit feedback
    pub alpha: f32,
    /// Seed for factor initialization
    pub seed: u64,
}

impl Default for AlsSettings {
    fn default() -> Self {
        Self {
            factors: 64,
            iterations: 15,
            regularization: 0.1,
            alpha: 40.0,
            seed: 42,
        }
    }
}

/// Drift simulation parameters.
///
/// # Environment Variables
///
/// - `RECO_LAB_DRIFT_NOISE_STD` (default: 0.2)
/// - `RECO_LAB_DRIFT_SEED` (default: 17)
/// - `RECO_LAB_DRIFT_QUANTILE` (default: 0.75)
#[derive(Debug, Clone)]
pub struct DriftSettings {
    /// Standard deviation of the Gaussian rating noise
    pub noise_std: f64,
    /// Seed for the noise source; same seed, byte-identical output
    pub seed: u64,
    /// Index-range truncation quantile
    pub population_quantile: f64,
    /// Lower bound of the valid rating range
    pub rating_min: f32,
    /// Upper bound of the valid rating range
    pub rating_max: f32,
}

impl Default for DriftSettings {
    fn default() -> Self {
        Self {
            noise_std: 0.2,
            seed: 17,
            population_quantile: 0.75,
            rating_min: 1.0,
            rating_max: 5.0,
        }
    }
}

/// Full pipeline configuration, passed explicitly to each stage.
///
/// # Environment Variables
///
/// - `RECO_LAB_MIN_USER_INTERACTIONS` (default: 5)
/// - `RECO_LAB_MIN_ITEM_INTERACTIONS` (default: 10)
/// - `RECO_LAB_TOP_N` (default: 10)
///
/// plus the variables documented on [`ArtifactPaths`], [`AlsSettings`] and
/// [`DriftSettings`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub paths: ArtifactPaths,
    /// Minimum interactions for a user to survive filtering
    pub min_user_interactions: usize,
    /// Minimum interactions for an item to survive filtering
    pub min_item_interactions: usize,
    /// Default recommendation list length
    pub top_n: usize,
    pub als: AlsSettings,
    pub drift: DriftSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            paths: ArtifactPaths::default(),
            min_user_interactions: 5,
            min_item_interactions: 10,
            top_n: 10,
            als: AlsSettings::default(),
            drift: DriftSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, CoreError> {
        let defaults = Self::default();

        let paths = ArtifactPaths {
            raw_input: path_env_var("RECO_LAB_RAW_INPUT", defaults.paths.raw_input),
            interactions: path_env_var("RECO_LAB_INTERACTIONS", defaults.paths.interactions),
            drifted_interactions: path_env_var(
                "RECO_LAB_DRIFTED_INTERACTIONS",
                defaults.paths.drifted_interactions,
            ),
            model: path_env_var("RECO_LAB_MODEL_PATH", defaults.paths.model),
            top_items: path_env_var("RECO_LAB_TOP_ITEMS", defaults.paths.top_items),
            drift_report: path_env_var("RECO_LAB_DRIFT_REPORT", defaults.paths.drift_report),
            tracking_dir: path_env_var("RECO_LAB_TRACKING_DIR", defaults.paths.tracking_dir),
        };

        let als = AlsSettings {
            factors: parse_env_var("RECO_LAB_ALS_FACTORS", defaults.als.factors)?,
            iterations: parse_env_var("RECO_LAB_ALS_ITERATIONS", defaults.als.iterations)?,
            regularization: parse_env_var(
                "RECO_LAB_ALS_REGULARIZATION",
                defaults.als.regularization,
            )?,
            alpha: parse_env_var("RECO_LAB_ALS_ALPHA", defaults.als.alpha)?,
            seed: parse_env_var("RECO_LAB_ALS_SEED", defaults.als.seed)?,
        };

        let drift = DriftSettings {
            noise_std: parse_env_var("RECO_LAB_DRIFT_NOISE_STD", defaults.drift.noise_std)?,
            seed: parse_env_var("RECO_LAB_DRIFT_SEED", defaults.drift.seed)?,
            population_quantile: parse_env_var(
                "RECO_LAB_DRIFT_QUANTILE",
                defaults.drift.population_quantile,
            )?,
            rating_min: defaults.drift.rating_min,
            rating_max: defaults.drift.rating_max,
        };

        Ok(Self {
            paths,
            min_user_interactions: parse_env_var(
                "RECO_LAB_MIN_USER_INTERACTIONS",
                defaults.min_user_interactions,
            )?,
            min_item_interactions: parse_env_var(
                "RECO_LAB_MIN_ITEM_INTERACTIONS",
                defaults.min_item_interactions,
            )?,
            top_n: parse_env_var("RECO_LAB_TOP_N", defaults.top_n)?,
            als,
            drift,
        })
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.min_user_interactions == 0 {
            return Err(config_error(
                "min_user_interactions must be greater than 0",
                "RECO_LAB_MIN_USER_INTERACTIONS",
            ));
        }

        if self.min_item_interactions == 0 {
            return Err(config_error(
                "min_item_interactions must be greater than 0",
                "RECO_LAB_MIN_ITEM_INTERACTIONS",
            ));
        }

        if self.top_n == 0 {
            return Err(config_error(
                "top_n must be greater than 0",
                "RECO_LAB_TOP_N",
            ));
        }

        if self.als.factors == 0 {
            return Err(config_error(
                "als factors must be greater than 0",
                "RECO_LAB_ALS_FACTORS",
            ));
        }

        if self.als.iterations == 0 {
            return Err(config_error(
                "als iterations must be greater than 0",
                "RECO_LAB_ALS_ITERATIONS",
            ));
        }

        if self.als.regularization <= 0.0 {
            return Err(config_error(
                "als regularization must be positive",
                "RECO_LAB_ALS_REGULARIZATION",
            ));
        }

        if self.drift.noise_std <= 0.0 {
            return Err(config_error(
                "drift noise_std must be positive",
                "RECO_LAB_DRIFT_NOISE_STD",
            ));
        }

        if !(0.0 < self.drift.population_quantile && self.drift.population_quantile < 1.0) {
            return Err(config_error(
                "drift quantile must be strictly between 0 and 1",
                "RECO_LAB_DRIFT_QUANTILE",
            ));
        }

        if self.drift.rating_min >= self.drift.rating_max {
            return Err(CoreError::ConfigurationError {
                message: "rating_min must be below rating_max".to_string(),
                key: None,
            });
        }

        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> CoreError {
    CoreError::ConfigurationError {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn path_env_var(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

/// Parse an environment variable with a default value.
fn parse_env_var<T>(key: &str, default: T) -> Result<T, CoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(key)
        .ok()
        .map(|v| {
            v.parse::<T>().map_err(|e| CoreError::ConfigurationError {
                message: format!("Failed to parse {}: {}", key, e),
                key: Some(key.to_string()),
            })
        })
        .unwrap_or(Ok(default))
}

/// Load a `.env` file if present. Missing files are not an error.
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }
}
