//! Popularity baseline recommender
//!
//! Ranks items by interaction frequency over the full normalized table and
//! evaluates a simple hit rate against the histories of the first
//! [`EVALUATION_SAMPLE`] distinct users. Stateless: nothing persists beyond
//! the run except the top-items text artifact.

use crate::dataset::{read_interactions, write_atomic, Interaction};
use crate::error::{PipelineError, Result};
use reco_lab_core::{ExperimentTracker, PipelineConfig, RunRecord};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use tracing::info;

/// Number of distinct users (by appearance order) sampled for evaluation.
pub const EVALUATION_SAMPLE: usize = 100;

/// Top-N items by descending interaction frequency. Ties break by first
/// appearance in the data.
pub fn top_items(rows: &[Interaction], n: usize) -> Vec<u32> {
    let mut counts: HashMap<u32, (usize, usize)> = HashMap::new();
    for (position, row) in rows.iter().enumerate() {
        let entry = counts.entry(row.item_idx).or_insert((0, position));
        entry.0 += 1;
    }

    let mut ranked: Vec<(u32, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().take(n).map(|(item, _)| item).collect()
}

/// Mean hit rate over the first `sample_size` distinct users: a user scores
/// a hit when any of their historical items appears in the top-N set.
pub fn hit_rate(rows: &[Interaction], top: &[u32], sample_size: usize) -> Result<f64> {
    if rows.is_empty() {
        return Err(PipelineError::EmptyAfterFiltering {
            stage: "baseline evaluation",
        });
    }

    let top_set: HashSet<u32> = top.iter().copied().collect();
    let mut user_order: Vec<u32> = Vec::new();
    let mut histories: HashMap<u32, HashSet<u32>> = HashMap::new();
    for row in rows {
        let history = histories.entry(row.user_idx).or_insert_with(|| {
            user_order.push(row.user_idx);
            HashSet::new()
        });
        history.insert(row.item_idx);
    }

    let sample: Vec<u32> = user_order.into_iter().take(sample_size).collect();
    let hits = sample
        .iter()
        .filter(|user| histories[user].iter().any(|item| top_set.contains(item)))
        .count();

    Ok(hits as f64 / sample.len() as f64)
}

/// Baseline training stage: rank, evaluate, persist the top-items artifact.
pub fn train_baseline(config: &PipelineConfig, tracker: &dyn ExperimentTracker) -> Result<f64> {
    let rows = read_interactions(&config.paths.interactions)?;
    if rows.is_empty() {
        return Err(PipelineError::EmptyAfterFiltering {
            stage: "baseline input",
        });
    }

    let top = top_items(&rows, config.top_n);
    let rate = hit_rate(&rows, &top, EVALUATION_SAMPLE)?;

    let mut text = String::new();
    for item in &top {
        let _ = writeln!(text, "{}", item);
    }
    write_atomic(&config.paths.top_items, text.as_bytes())?;
    info!(
        top_n = config.top_n,
        hit_rate = rate,
        path = %config.paths.top_items.display(),
        "baseline popularity model evaluated"
    );

    let mut run = RunRecord::new("baseline_popularity");
    run.log_param("model", "popularity_based");
    run.log_param("top_n", config.top_n);
    run.log_metric("hit_rate", rate);
    run.log_artifact(&config.paths.top_items);
    tracker.record(run)?;

    Ok(rate)
}
