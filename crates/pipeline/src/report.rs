//! Drift report
//!
//! Compares a reference and a current interaction table column by column and
//! renders a static HTML report. Columns are compared with mean/std shift
//! and the Population Stability Index over reference-quantile bins; the
//! dataset as a whole drifts when at least half of its columns do.

use crate::dataset::{read_interactions, write_atomic, Interaction};
use crate::drift::quantile;
use crate::error::{PipelineError, Result};
use reco_lab_core::{ExperimentTracker, PipelineConfig, RunRecord};
use serde::Serialize;
use std::fmt::Write as _;
use tracing::info;

/// PSI above this flags a column as drifted.
pub const PSI_DRIFT_THRESHOLD: f64 = 0.2;
/// Number of reference-quantile bins for PSI.
const PSI_BINS: usize = 10;
/// Floor for bin proportions so empty bins stay finite.
const PSI_EPSILON: f64 = 1e-6;

/// Per-column drift metrics.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnDrift {
    pub column: String,
    pub reference_mean: f64,
    pub current_mean: f64,
    pub reference_std: f64,
    pub current_std: f64,
    pub psi: f64,
    pub drifted: bool,
}

/// Drift comparison result over a snapshot pair.
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub reference_rows: usize,
    pub current_rows: usize,
    pub columns: Vec<ColumnDrift>,
    pub drifted_columns: usize,
    pub dataset_drift: bool,
}

impl DriftReport {
    /// Compare two normalized interaction tables. Both inputs are read-only
    /// and must be non-empty.
    pub fn compare(reference: &[Interaction], current: &[Interaction]) -> Result<Self> {
        if reference.is_empty() || current.is_empty() {
            return Err(PipelineError::EmptyAfterFiltering {
                stage: "drift comparison",
            });
        }

        let columns = vec![
            column_drift(
                "user_idx",
                &extract(reference, |r| r.user_idx as f64),
                &extract(current, |r| r.user_idx as f64),
            ),
            column_drift(
                "item_idx",
                &extract(reference, |r| r.item_idx as f64),
                &extract(current, |r| r.item_idx as f64),
            ),
            column_drift(
                "rating",
                &extract(reference, |r| r.rating as f64),
                &extract(current, |r| r.rating as f64),
            ),
        ];

        let drifted_columns = columns.iter().filter(|c| c.drifted).count();
        let dataset_drift = drifted_columns * 2 >= columns.len();

        Ok(Self {
            reference_rows: reference.len(),
            current_rows: current.len(),
            columns,
            drifted_columns,
            dataset_drift,
        })
    }

    /// Render a self-contained HTML document.
    pub fn render_html(&self) -> String {
        let mut html = String::new();
        let _ = writeln!(html, "<!DOCTYPE html>");
        let _ = writeln!(html, "<html><head><title>Data Drift Report</title>");
        let _ = writeln!(
            html,
            "<style>body{{font-family:sans-serif}}table{{border-collapse:collapse}}\
             td,th{{border:1px solid #999;padding:4px 8px}}.drifted{{color:#b00}}</style>"
        );
        let _ = writeln!(html, "</head><body>");
        let _ = writeln!(html, "<h1>Data Drift Report</h1>");
        let _ = writeln!(
            html,
            "<p>Reference rows: {} &mdash; Current rows: {}</p>",
            self.reference_rows, self.current_rows
        );
        let _ = writeln!(
            html,
            "<p>Dataset drift: <strong>{}</strong> ({} of {} columns drifted)</p>",
            if self.dataset_drift { "DETECTED" } else { "not detected" },
            self.drifted_columns,
            self.columns.len()
        );
        let _ = writeln!(
            html,
            "<table><tr><th>Column</th><th>Ref mean</th><th>Cur mean</th>\
             <th>Ref std</th><th>Cur std</th><th>PSI</th><th>Drifted</th></tr>"
        );
        for column in &self.columns {
            let _ = writeln!(
                html,
                "<tr class=\"{}\"><td>{}</td><td>{:.4}</td><td>{:.4}</td>\
                 <td>{:.4}</td><td>{:.4}</td><td>{:.4}</td><td>{}</td></tr>",
                if column.drifted { "drifted" } else { "" },
                column.column,
                column.reference_mean,
                column.current_mean,
                column.reference_std,
                column.current_std,
                column.psi,
                if column.drifted { "yes" } else { "no" },
            );
        }
        let _ = writeln!(html, "</table></body></html>");
        html
    }
}

fn extract(rows: &[Interaction], f: impl Fn(&Interaction) -> f64) -> Vec<f64> {
    rows.iter().map(f).collect()
}

fn column_drift(name: &str, reference: &[f64], current: &[f64]) -> ColumnDrift {
    let psi = population_stability_index(reference, current);
    ColumnDrift {
        column: name.to_string(),
        reference_mean: mean(reference),
        current_mean: mean(current),
        reference_std: std_dev(reference),
        current_std: std_dev(current),
        psi,
        drifted: psi > PSI_DRIFT_THRESHOLD,
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// PSI over bins cut at the reference distribution's quantiles. Duplicate
/// bin edges (common for low-cardinality columns) are collapsed.
fn population_stability_index(reference: &[f64], current: &[f64]) -> f64 {
    let mut edges: Vec<f64> = (1..PSI_BINS)
        .map(|i| quantile(reference, i as f64 / PSI_BINS as f64))
        .collect();
    edges.dedup();

    let reference_props = bin_proportions(reference, &edges);
    let current_props = bin_proportions(current, &edges);

    reference_props
        .iter()
        .zip(&current_props)
        .map(|(&p_ref, &p_cur)| {
            let p_ref = p_ref.max(PSI_EPSILON);
            let p_cur = p_cur.max(PSI_EPSILON);
            (p_ref - p_cur) * (p_ref / p_cur).ln()
        })
        .sum()
}

fn bin_proportions(values: &[f64], edges: &[f64]) -> Vec<f64> {
    let mut counts = vec![0usize; edges.len() + 1];
    for &value in values {
        let bucket = edges.partition_point(|&edge| edge < value);
        counts[bucket] += 1;
    }
    counts
        .into_iter()
        .map(|c| c as f64 / values.len() as f64)
        .collect()
}

/// Drift report stage: compare the reference and drifted tables and persist
/// the rendered report.
pub fn drift_report(config: &PipelineConfig, tracker: &dyn ExperimentTracker) -> Result<DriftReport> {
    let reference = read_interactions(&config.paths.interactions)?;
    let current = read_interactions(&config.paths.drifted_interactions)?;

    let report = DriftReport::compare(&reference, &current)?;
    write_atomic(&config.paths.drift_report, report.render_html().as_bytes())?;
    info!(
        drifted_columns = report.drifted_columns,
        dataset_drift = report.dataset_drift,
        path = %config.paths.drift_report.display(),
        "saved drift report"
    );

    let mut run = RunRecord::new("drift_detection");
    for column in &report.columns {
        run.log_metric(format!("psi_{}", column.column), column.psi);
    }
    run.log_metric("drifted_columns", report.drifted_columns as f64);
    run.log_metric("dataset_drift", if report.dataset_drift { 1.0 } else { 0.0 });
    run.log_artifact(&config.paths.drift_report);
    tracker.record(run)?;

    Ok(report)
}
