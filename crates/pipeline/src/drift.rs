//! Drift simulation
//!
//! Derives a perturbed copy of the interaction table: the item range is
//! truncated below its 75th percentile, then the user range below the 75th
//! percentile of the rows that survived the item cut (population shift), and
//! ratings get independent Gaussian noise clipped to the valid rating range.
//! The noise source is an explicit seeded RNG, so a fixed seed gives
//! byte-identical output across runs.

use crate::dataset::{read_interactions, write_interactions, Interaction};
use crate::error::{PipelineError, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use reco_lab_core::{DriftSettings, ExperimentTracker, PipelineConfig, RunRecord};
use tracing::info;

/// Quantile with linear interpolation between closest ranks. `values` must
/// be non-empty.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let weight = position - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

/// Apply the drift transform to a normalized table. The cuts are sequential:
/// the user cutoff is a quantile of the rows remaining after the item cut,
/// not of the full table.
pub fn simulate(rows: &[Interaction], settings: &DriftSettings) -> Result<Vec<Interaction>> {
    if rows.is_empty() {
        return Err(PipelineError::EmptyAfterFiltering {
            stage: "drift input",
        });
    }

    let item_values: Vec<f64> = rows.iter().map(|r| r.item_idx as f64).collect();
    let item_cut = quantile(&item_values, settings.population_quantile);
    let retained: Vec<&Interaction> = rows
        .iter()
        .filter(|r| (r.item_idx as f64) < item_cut)
        .collect();
    if retained.is_empty() {
        return Err(PipelineError::EmptyAfterFiltering {
            stage: "drift truncation",
        });
    }

    let user_values: Vec<f64> = retained.iter().map(|r| r.user_idx as f64).collect();
    let user_cut = quantile(&user_values, settings.population_quantile);

    let mut rng = StdRng::seed_from_u64(settings.seed);
    let noise = Normal::new(0.0, settings.noise_std)
        .map_err(|e| PipelineError::Drift(e.to_string()))?;

    let mut drifted = Vec::new();
    for row in retained {
        if (row.user_idx as f64) < user_cut {
            let noisy = row.rating as f64 + noise.sample(&mut rng);
            drifted.push(Interaction {
                rating: (noisy as f32).clamp(settings.rating_min, settings.rating_max),
                ..*row
            });
        }
    }

    if drifted.is_empty() {
        return Err(PipelineError::EmptyAfterFiltering {
            stage: "drift truncation",
        });
    }
    Ok(drifted)
}

/// Drift simulation stage: read the reference table, perturb, persist the
/// drifted copy.
pub fn simulate_drift(config: &PipelineConfig, tracker: &dyn ExperimentTracker) -> Result<Vec<Interaction>> {
    let rows = read_interactions(&config.paths.interactions)?;
    let drifted = simulate(&rows, &config.drift)?;
    write_interactions(&config.paths.drifted_interactions, &drifted)?;
    info!(
        before = rows.len(),
        after = drifted.len(),
        path = %config.paths.drifted_interactions.display(),
        "saved drifted interactions"
    );

    let mut run = RunRecord::new("simulate_drift");
    run.log_param("noise_std", config.drift.noise_std);
    run.log_param("seed", config.drift.seed);
    run.log_param("population_quantile", config.drift.population_quantile);
    run.log_metric("rows_before", rows.len() as f64);
    run.log_metric("rows_after", drifted.len() as f64);
    run.log_artifact(&config.paths.drifted_interactions);
    tracker.record(run)?;

    Ok(drifted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(user_idx: u32, item_idx: u32, rating: f32) -> Interaction {
        Interaction {
            user_idx,
            item_idx,
            rating,
        }
    }

    fn settings(seed: u64) -> DriftSettings {
        DriftSettings {
            seed,
            ..DriftSettings::default()
        }
    }

    /// Spread of indices wide enough that truncation keeps something.
    fn sample_rows() -> Vec<Interaction> {
        (0..20)
            .map(|i| row(i % 8, i % 6, 1.0 + (i % 5) as f32))
            .collect()
    }

    #[test]
    fn test_quantile_interpolates() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        assert!((quantile(&values, 0.5) - 2.5).abs() < 1e-12);
        assert!((quantile(&values, 0.75) - 3.25).abs() < 1e-12);
        assert_eq!(quantile(&values, 0.0), 1.0);
        assert_eq!(quantile(&values, 1.0), 4.0);
    }

    #[test]
    fn test_simulate_truncates_index_ranges() {
        let rows = sample_rows();
        let item_cut = quantile(&rows.iter().map(|r| r.item_idx as f64).collect::<Vec<_>>(), 0.75);
        let item_filtered: Vec<&Interaction> =
            rows.iter().filter(|r| (r.item_idx as f64) < item_cut).collect();
        let user_cut = quantile(
            &item_filtered.iter().map(|r| r.user_idx as f64).collect::<Vec<_>>(),
            0.75,
        );

        let drifted = simulate(&rows, &settings(1)).unwrap();
        assert!(!drifted.is_empty());
        assert!(drifted
            .iter()
            .all(|r| (r.user_idx as f64) < user_cut && (r.item_idx as f64) < item_cut));
    }

    #[test]
    fn test_simulate_user_cut_follows_item_cut() {
        // Item q75 over [0, 0, 0, 9] is 2.25, dropping only the (3, 9) row.
        // The user cut must then come from the remaining users [0, 1, 2]
        // (q75 = 1.5, keeping users 0 and 1), not from the full column
        // [0, 1, 2, 3] (q75 = 2.25, which would also keep user 2).
        let rows = vec![row(0, 0, 3.0), row(1, 0, 3.0), row(2, 0, 3.0), row(3, 9, 3.0)];

        let drifted = simulate(&rows, &settings(1)).unwrap();
        assert_eq!(drifted.len(), 2);
        let users: Vec<u32> = drifted.iter().map(|r| r.user_idx).collect();
        assert_eq!(users, vec![0, 1]);
    }

    #[test]
    fn test_simulate_clips_ratings() {
        let rows: Vec<Interaction> = (0..50).map(|i| row(i % 4, i % 4, 5.0)).collect();
        let drifted = simulate(&rows, &settings(3)).unwrap();
        assert!(drifted.iter().all(|r| (1.0..=5.0).contains(&r.rating)));
    }

    #[test]
    fn test_simulate_same_seed_identical() {
        let rows = sample_rows();
        let first = simulate(&rows, &settings(42)).unwrap();
        let second = simulate(&rows, &settings(42)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_simulate_different_seed_differs() {
        let rows = sample_rows();
        let first = simulate(&rows, &settings(1)).unwrap();
        let second = simulate(&rows, &settings(2)).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_simulate_empty_input() {
        let err = simulate(&[], &settings(1)).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyAfterFiltering { .. }));
    }

    #[test]
    fn test_simulate_truncation_can_empty_table() {
        // All rows share one index, so nothing falls below the 75th percentile
        let rows = vec![row(0, 0, 3.0); 4];
        let err = simulate(&rows, &settings(1)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::EmptyAfterFiltering {
                stage: "drift truncation"
            }
        ));
    }
}
