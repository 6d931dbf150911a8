//! # Reco Lab Pipeline
//!
//! Offline recommender experimentation pipeline. Stages communicate only
//! through files on disk; each stage reads immutable upstream artifacts and
//! writes new ones:
//!
//! - `dataset`: raw review ingestion, activity filtering, index encoding
//! - `baseline`: popularity top-N ranking and hit-rate evaluation
//! - `matrix_factorization`: ALS training over the sparse interaction matrix
//! - `model`: persisted factor model artifact and the serving wrapper
//! - `drift`: drifted-copy simulation of the interaction table
//! - `report`: reference-vs-current drift comparison and HTML report

pub mod baseline;
pub mod dataset;
pub mod drift;
pub mod error;
pub mod matrix_factorization;
pub mod model;
pub mod report;

pub use baseline::{hit_rate, top_items, train_baseline, EVALUATION_SAMPLE};
pub use dataset::{prepare, read_interactions, write_interactions, IdEncoder, Interaction, RawInteraction};
pub use drift::{simulate, simulate_drift};
pub use error::PipelineError;
pub use matrix_factorization::{MatrixFactorization, SparseMatrix};
pub use model::{read_queries, train_als, AlsRecommender, FactorModel, RecommendQuery};
pub use report::{drift_report, ColumnDrift, DriftReport, PSI_DRIFT_THRESHOLD};

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
