use reco_lab_core::CoreError;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline error taxonomy. Every variant is unrecoverable at the point of
/// detection: a stage either fully succeeds and writes its artifact, or
/// fails and writes nothing.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    #[error("No interactions left after {stage}")]
    EmptyAfterFiltering { stage: &'static str },

    #[error("Unknown user {0}: not present at training time")]
    UnknownUser(u32),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(PathBuf),

    #[error("Model has not been trained")]
    ModelNotTrained,

    #[error("Factorization failed: {0}")]
    Factorization(String),

    #[error("Drift simulation failed: {0}")]
    Drift(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Model artifact codec error: {0}")]
    Artifact(#[from] bincode::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}
