//! # Reco Lab Core
//!
//! Shared building blocks for the Reco Lab experimentation pipeline:
//! configuration loading, the shared error type, and the write-only
//! experiment tracking sink used by every stage.
//!
//! ## Modules
//!
//! - `config`: Configuration loading and validation
//! - `error`: Shared error type
//! - `tracking`: Experiment run logging

pub mod config;
pub mod error;
pub mod tracking;

pub use config::{
    load_dotenv, AlsSettings, ArtifactPaths, DriftSettings, PipelineConfig,
};
pub use error::CoreError;
pub use tracking::{ExperimentTracker, JsonlTracker, NoopTracker, RunRecord};

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
