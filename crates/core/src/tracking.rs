//! Write-only experiment tracking sink
//!
//! Each pipeline stage opens a named run, attaches parameters, metrics and
//! artifact paths, and hands the finished run to a tracker. The sink has no
//! read-back contract; downstream tooling consumes the log files directly.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// A single experiment run under construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub artifacts: Vec<PathBuf>,
}

impl RunRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started_at: Utc::now(),
            finished_at: None,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn log_param(&mut self, key: impl Into<String>, value: impl Display) {
        self.params.insert(key.into(), value.to_string());
    }

    pub fn log_metric(&mut self, key: impl Into<String>, value: f64) {
        self.metrics.insert(key.into(), value);
    }

    pub fn log_artifact(&mut self, path: impl AsRef<Path>) {
        self.artifacts.push(path.as_ref().to_path_buf());
    }
}

/// Experiment run sink.
pub trait ExperimentTracker {
    /// Record a finished run. Implementations stamp `finished_at`.
    fn record(&self, run: RunRecord) -> Result<()>;
}

/// File-backed tracker appending one JSON document per run to
/// `<dir>/runs.jsonl`.
pub struct JsonlTracker {
    dir: PathBuf,
}

impl JsonlTracker {
    /// Create the tracker, creating the tracking directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|_| CoreError::TrackingDirUnavailable(dir.clone()))?;
        Ok(Self { dir })
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join("runs.jsonl")
    }
}

impl ExperimentTracker for JsonlTracker {
    fn record(&self, mut run: RunRecord) -> Result<()> {
        run.finished_at = Some(Utc::now());

        let line = serde_json::to_string(&run)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())?;
        writeln!(file, "{}", line)?;

        info!(run = %run.name, metrics = run.metrics.len(), "recorded experiment run");
        Ok(())
    }
}

/// Tracker that drops every run. Useful in tests and one-off invocations.
pub struct NoopTracker;

impl ExperimentTracker for NoopTracker {
    fn record(&self, _run: RunRecord) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_record_accumulates() {
        let mut run = RunRecord::new("baseline_popularity");
        run.log_param("model", "popularity_based");
        run.log_param("top_n", 10);
        run.log_metric("hit_rate", 0.42);
        run.log_artifact("outputs/top_items.txt");

        assert_eq!(run.params.get("top_n"), Some(&"10".to_string()));
        assert_eq!(run.metrics.get("hit_rate"), Some(&0.42));
        assert_eq!(run.artifacts.len(), 1);
        assert!(run.finished_at.is_none());
    }

    #[test]
    fn test_jsonl_tracker_appends_runs() {
        let dir = TempDir::new().unwrap();
        let tracker = JsonlTracker::new(dir.path()).unwrap();

        let mut run = RunRecord::new("als_matrix_factorization");
        run.log_param("factors", 64);
        run.log_metric("num_users", 120.0);
        tracker.record(run).unwrap();

        tracker.record(RunRecord::new("drift_detection")).unwrap();

        let contents = std::fs::read_to_string(tracker.log_path()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: RunRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.name, "als_matrix_factorization");
        assert!(first.finished_at.is_some());
    }

    #[test]
    fn test_noop_tracker() {
        assert!(NoopTracker.record(RunRecord::new("anything")).is_ok());
    }
}
