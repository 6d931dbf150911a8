//! Factor model artifact and recommendation serving wrapper
//!
//! Training produces a [`FactorModel`] artifact: latent factor matrices plus
//! a persisted per-user index of training-time items, so serving can exclude
//! already-seen items without reaching into trainer internals. The artifact
//! is written once and loaded read-only; retraining writes a new artifact,
//! never mutates one in place.

use crate::dataset::{open_artifact, read_interactions, write_atomic, Interaction};
use crate::error::{PipelineError, Result};
use crate::matrix_factorization::{MatrixFactorization, SparseMatrix};
use ndarray::Array2;
use reco_lab_core::{ExperimentTracker, PipelineConfig, RunRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

/// Persisted trained model: opaque blob on disk, consumed only by the
/// serving wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorModel {
    /// Latent dimensionality
    pub factors: usize,
    /// User latent factors: [num_users x factors]
    pub user_factors: Array2<f32>,
    /// Item latent factors: [num_items x factors]
    pub item_factors: Array2<f32>,
    /// Training-time items per user, sorted ascending. Serving excludes
    /// these from every recommendation list.
    pub seen_items: Vec<Vec<u32>>,
}

impl FactorModel {
    /// Assemble the artifact from a trained factorization and the training
    /// table it was fit on.
    pub fn from_trained(model: &MatrixFactorization, rows: &[Interaction]) -> Result<Self> {
        let user_factors = model
            .user_factors
            .clone()
            .ok_or(PipelineError::ModelNotTrained)?;
        let item_factors = model
            .item_factors
            .clone()
            .ok_or(PipelineError::ModelNotTrained)?;

        let mut seen: Vec<BTreeSet<u32>> = vec![BTreeSet::new(); user_factors.nrows()];
        for row in rows {
            if let Some(items) = seen.get_mut(row.user_idx as usize) {
                items.insert(row.item_idx);
            }
        }

        Ok(Self {
            factors: model.settings().factors,
            user_factors,
            item_factors,
            seen_items: seen.into_iter().map(|s| s.into_iter().collect()).collect(),
        })
    }

    pub fn num_users(&self) -> usize {
        self.user_factors.nrows()
    }

    pub fn num_items(&self) -> usize {
        self.item_factors.nrows()
    }

    /// Serialize to a single blob on disk.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serialize(self)?;
        write_atomic(path, &bytes)
    }

    /// Load a persisted artifact. A missing file is `ArtifactNotFound`.
    pub fn load(path: &Path) -> Result<Self> {
        let file = open_artifact(path)?;
        let model = bincode::deserialize_from(BufReader::new(file))?;
        Ok(model)
    }

    /// Top-N items for one user by predicted affinity, excluding items the
    /// user interacted with at training time. A user outside the training
    /// vocabulary fails with `UnknownUser`.
    pub fn recommend(&self, user_idx: u32, top_n: usize) -> Result<Vec<u32>> {
        let u = user_idx as usize;
        if u >= self.num_users() {
            return Err(PipelineError::UnknownUser(user_idx));
        }

        let scores = self.item_factors.dot(&self.user_factors.row(u));
        let seen = &self.seen_items[u];

        let mut ranked: Vec<(u32, f32)> = scores
            .iter()
            .enumerate()
            .map(|(i, &score)| (i as u32, score))
            .filter(|(i, _)| seen.binary_search(i).is_err())
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        Ok(ranked.into_iter().take(top_n).map(|(i, _)| i).collect())
    }
}

/// One row of a serving input batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendQuery {
    pub user_id: u32,
    #[serde(default)]
    pub top_n: Option<usize>,
}

/// Serving wrapper around a persisted factor model.
pub struct AlsRecommender {
    model: FactorModel,
}

impl AlsRecommender {
    pub fn new(model: FactorModel) -> Self {
        Self { model }
    }

    /// Load a serving-ready recommender from a persisted artifact.
    pub fn load(path: &Path) -> Result<Self> {
        let model = FactorModel::load(path)?;
        info!(
            users = model.num_users(),
            items = model.num_items(),
            factors = model.factors,
            path = %path.display(),
            "loaded factor model"
        );
        Ok(Self::new(model))
    }

    pub fn model(&self) -> &FactorModel {
        &self.model
    }

    /// Ranked item indices for one user.
    pub fn recommend(&self, user_idx: u32, top_n: usize) -> Result<Vec<u32>> {
        self.model.recommend(user_idx, top_n)
    }

    /// Answer a batch of queries; a row without `top_n` falls back to
    /// `default_top_n`.
    pub fn recommend_batch(
        &self,
        queries: &[RecommendQuery],
        default_top_n: usize,
    ) -> Result<Vec<Vec<u32>>> {
        queries
            .iter()
            .map(|q| self.recommend(q.user_id, q.top_n.unwrap_or(default_top_n)))
            .collect()
    }
}

/// Read a serving batch: CSV with a required `user_id` column and an
/// optional `top_n` column.
pub fn read_queries(path: &Path) -> Result<Vec<RecommendQuery>> {
    let file = open_artifact(path)?;
    let mut reader = csv::Reader::from_reader(BufReader::new(file));
    let mut queries = Vec::new();
    for query in reader.deserialize() {
        queries.push(query?);
    }
    Ok(queries)
}

/// ALS training stage: build the matrix, fit, persist the artifact.
pub fn train_als(config: &PipelineConfig, tracker: &dyn ExperimentTracker) -> Result<FactorModel> {
    let rows = read_interactions(&config.paths.interactions)?;
    if rows.is_empty() {
        return Err(PipelineError::EmptyAfterFiltering {
            stage: "als training input",
        });
    }

    let matrix = SparseMatrix::from_interactions(&rows);
    info!(
        users = matrix.num_users,
        items = matrix.num_items,
        nnz = matrix.nnz(),
        "built interaction matrix"
    );

    let mut factorization = MatrixFactorization::new(config.als.clone());
    factorization.fit(&matrix)?;

    let artifact = FactorModel::from_trained(&factorization, &rows)?;
    artifact.save(&config.paths.model)?;
    info!(path = %config.paths.model.display(), "saved factor model");

    // Sample top-N for the first user, mirrored into the run log
    let sample_top_items = artifact.recommend(0, config.top_n)?;

    let mut run = RunRecord::new("als_matrix_factorization");
    run.log_param("model", "ALS");
    run.log_param("factors", config.als.factors);
    run.log_param("iterations", config.als.iterations);
    run.log_param("regularization", config.als.regularization);
    run.log_param("alpha", config.als.alpha);
    run.log_param("sample_user", 0);
    run.log_param("sample_top_items", format!("{:?}", sample_top_items));
    run.log_metric("num_users", matrix.num_users as f64);
    run.log_metric("num_items", matrix.num_items as f64);
    run.log_metric("nnz", matrix.nnz() as f64);
    run.log_artifact(&config.paths.model);
    tracker.record(run)?;

    Ok(artifact)
}
