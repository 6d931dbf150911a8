//! Matrix factorization using Alternating Least Squares (ALS)
//!
//! Decomposes the user-item interaction matrix into latent user and item
//! factors. Factor initialization is driven by a configurable seed so a
//! training run is reproducible.

use crate::dataset::Interaction;
use crate::error::{PipelineError, Result};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reco_lab_core::AlsSettings;
use std::collections::HashMap;
use tracing::debug;

/// Sparse user-item interaction matrix. Duplicate (user, item) entries are
/// summed, never dropped.
#[derive(Debug, Clone, Default)]
pub struct SparseMatrix {
    entries: HashMap<(u32, u32), f32>,
    pub num_users: usize,
    pub num_items: usize,
}

impl SparseMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_interactions(rows: &[Interaction]) -> Self {
        let mut matrix = Self::new();
        for row in rows {
            matrix.add(row.user_idx, row.item_idx, row.rating);
        }
        matrix
    }

    pub fn add(&mut self, user_idx: u32, item_idx: u32, value: f32) {
        *self.entries.entry((user_idx, item_idx)).or_insert(0.0) += value;
        self.num_users = self.num_users.max(user_idx as usize + 1);
        self.num_items = self.num_items.max(item_idx as usize + 1);
    }

    pub fn get(&self, user_idx: u32, item_idx: u32) -> f32 {
        *self.entries.get(&(user_idx, item_idx)).unwrap_or(&0.0)
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Per-user adjacency: observed (item, rating) pairs for each user row,
    /// sorted by item so sweeps are order-deterministic.
    fn by_user(&self) -> Vec<Vec<(usize, f32)>> {
        let mut adjacency = vec![Vec::new(); self.num_users];
        for (&(u, i), &rating) in &self.entries {
            adjacency[u as usize].push((i as usize, rating));
        }
        for observed in &mut adjacency {
            observed.sort_unstable_by_key(|&(i, _)| i);
        }
        adjacency
    }

    /// Per-item adjacency: observed (user, rating) pairs for each item column,
    /// sorted by user so sweeps are order-deterministic.
    fn by_item(&self) -> Vec<Vec<(usize, f32)>> {
        let mut adjacency = vec![Vec::new(); self.num_items];
        for (&(u, i), &rating) in &self.entries {
            adjacency[i as usize].push((u as usize, rating));
        }
        for observed in &mut adjacency {
            observed.sort_unstable_by_key(|&(u, _)| u);
        }
        adjacency
    }
}

/// ALS-based matrix factorization over dense user/item indices.
pub struct MatrixFactorization {
    settings: AlsSettings,
    /// User latent factors: [num_users x factors]
    pub user_factors: Option<Array2<f32>>,
    /// Item latent factors: [num_items x factors]
    pub item_factors: Option<Array2<f32>>,
}

impl MatrixFactorization {
    pub fn new(settings: AlsSettings) -> Self {
        Self {
            settings,
            user_factors: None,
            item_factors: None,
        }
    }

    pub fn settings(&self) -> &AlsSettings {
        &self.settings
    }

    /// Train on the sparse matrix, alternating regularized least-squares
    /// sweeps over users and items.
    pub fn fit(&mut self, matrix: &SparseMatrix) -> Result<()> {
        let k = self.settings.factors;
        let lambda = self.settings.regularization as f64;
        let alpha = self.settings.alpha;

        let mut rng = StdRng::seed_from_u64(self.settings.seed);
        let mut user_factors = Array2::<f32>::zeros((matrix.num_users, k));
        let mut item_factors = Array2::<f32>::zeros((matrix.num_items, k));
        for value in user_factors.iter_mut().chain(item_factors.iter_mut()) {
            *value = rng.gen_range(-0.1..0.1);
        }

        let by_user = matrix.by_user();
        let by_item = matrix.by_item();

        for iteration in 0..self.settings.iterations {
            for (u, observed) in by_user.iter().enumerate() {
                if !observed.is_empty() {
                    let solved = solve_factors(observed, &item_factors, k, lambda, alpha)?;
                    user_factors.row_mut(u).assign(&solved);
                }
            }

            for (i, observed) in by_item.iter().enumerate() {
                if !observed.is_empty() {
                    let solved = solve_factors(observed, &user_factors, k, lambda, alpha)?;
                    item_factors.row_mut(i).assign(&solved);
                }
            }

            if iteration % 2 == 0 {
                let loss = reconstruction_loss(matrix, &user_factors, &item_factors);
                debug!(iteration, loss, "als sweep complete");
            }
        }

        self.user_factors = Some(user_factors);
        self.item_factors = Some(item_factors);

        Ok(())
    }

    /// Predicted affinity scores of one user against every item.
    pub fn scores(&self, user_idx: u32) -> Result<Array1<f32>> {
        let user_factors = self
            .user_factors
            .as_ref()
            .ok_or(PipelineError::ModelNotTrained)?;
        let item_factors = self
            .item_factors
            .as_ref()
            .ok_or(PipelineError::ModelNotTrained)?;

        if user_idx as usize >= user_factors.nrows() {
            return Err(PipelineError::UnknownUser(user_idx));
        }

        Ok(item_factors.dot(&user_factors.row(user_idx as usize)))
    }

    /// Predicted rating for one (user, item) pair.
    pub fn predict(&self, user_idx: u32, item_idx: u32) -> Result<f32> {
        let scores = self.scores(user_idx)?;
        scores
            .get(item_idx as usize)
            .copied()
            .ok_or(PipelineError::Factorization(format!(
                "item index {} out of range",
                item_idx
            )))
    }
}

/// Solve one side's regularized least-squares system against the opposite
/// side's factors, with implicit-feedback confidence weighting.
fn solve_factors(
    observed: &[(usize, f32)],
    opposite: &Array2<f32>,
    k: usize,
    lambda: f64,
    alpha: f32,
) -> Result<Array1<f32>> {
    let mut a = Array2::<f64>::zeros((k, k));
    let mut b = Array1::<f64>::zeros(k);

    for &(index, rating) in observed {
        let vec = opposite.row(index);
        let confidence = 1.0 + alpha * rating;

        for i in 0..k {
            for j in 0..k {
                a[[i, j]] += (confidence * vec[i] * vec[j]) as f64;
            }
            b[i] += (confidence * rating * vec[i]) as f64;
        }
    }

    // Regularization keeps A positive definite
    for i in 0..k {
        a[[i, i]] += lambda;
    }

    let x = solve_cholesky(&a, &b)?;
    Ok(x.mapv(|v| v as f32))
}

/// Solve A * x = b for positive definite A via Cholesky decomposition.
fn solve_cholesky(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }

            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    return Err(PipelineError::Factorization(
                        "matrix is not positive definite".to_string(),
                    ));
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // Forward substitution: L * y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // Backward substitution: L^T * x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    Ok(x)
}

fn reconstruction_loss(
    matrix: &SparseMatrix,
    user_factors: &Array2<f32>,
    item_factors: &Array2<f32>,
) -> f32 {
    let mut loss = 0.0;
    for (&(u, i), &rating) in &matrix.entries {
        let prediction = user_factors
            .row(u as usize)
            .dot(&item_factors.row(i as usize));
        loss += (rating - prediction).powi(2);
    }

    if matrix.nnz() > 0 {
        loss / matrix.nnz() as f32
    } else {
        0.0
    }
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

    fn small_settings() -> AlsSettings {
        AlsSettings {
            factors: 4,
            iterations: 5,
            regularization: 0.1,
            alpha: 1.0,
            seed: 7,
        }
    }

    #[test]
    fn test_sparse_matrix_shape() {
        let mut matrix = SparseMatrix::new();
        matrix.add(0, 0, 1.0);
        matrix.add(0, 1, 2.0);
        matrix.add(1, 0, 3.0);

        assert_eq!(matrix.num_users, 2);
        assert_eq!(matrix.num_items, 2);
        assert_eq!(matrix.get(0, 1), 2.0);
        assert_eq!(matrix.get(1, 1), 0.0);
    }

    #[test]
    fn test_sparse_matrix_sums_duplicates() {
        let rows = vec![row(0, 0, 2.0), row(0, 0, 3.0), row(1, 2, 1.0)];
        let matrix = SparseMatrix::from_interactions(&rows);

        assert_eq!(matrix.get(0, 0), 5.0);
        assert_eq!(matrix.nnz(), 2);
        assert_eq!(matrix.num_items, 3);
    }

    #[test]
    fn test_fit_produces_factor_shapes() {
        let rows = vec![row(0, 0, 1.0), row(0, 1, 1.0), row(1, 0, 1.0)];
        let matrix = SparseMatrix::from_interactions(&rows);

        let mut mf = MatrixFactorization::new(small_settings());
        mf.fit(&matrix).unwrap();

        let user_factors = mf.user_factors.as_ref().unwrap();
        let item_factors = mf.item_factors.as_ref().unwrap();
        assert_eq!(user_factors.nrows(), 2);
        assert_eq!(user_factors.ncols(), 4);
        assert_eq!(item_factors.nrows(), 2);
        assert_eq!(item_factors.ncols(), 4);
    }

    #[test]
    fn test_fit_is_seed_deterministic() {
        let rows = vec![
            row(0, 0, 1.0),
            row(0, 1, 0.5),
            row(1, 0, 1.0),
            row(1, 2, 1.0),
        ];
        let matrix = SparseMatrix::from_interactions(&rows);

        let mut first = MatrixFactorization::new(small_settings());
        first.fit(&matrix).unwrap();
        let mut second = MatrixFactorization::new(small_settings());
        second.fit(&matrix).unwrap();

        assert_eq!(first.user_factors.unwrap(), second.user_factors.unwrap());
        assert_eq!(first.item_factors.unwrap(), second.item_factors.unwrap());
    }

    #[test]
    fn test_predict_known_pair() {
        let rows = vec![
            row(0, 0, 1.0),
            row(0, 1, 1.0),
            row(1, 0, 1.0),
            row(1, 2, 1.0),
        ];
        let matrix = SparseMatrix::from_interactions(&rows);

        let mut mf = MatrixFactorization::new(AlsSettings {
            factors: 8,
            iterations: 10,
            regularization: 0.1,
            alpha: 40.0,
            seed: 7,
        });
        mf.fit(&matrix).unwrap();

        let prediction = mf.predict(0, 0).unwrap();
        assert!(prediction > 0.0);
        assert!(mf.predict(0, 2).unwrap().abs() < 10.0);
    }

    #[test]
    fn test_scores_before_training() {
        let mf = MatrixFactorization::new(small_settings());
        assert!(matches!(
            mf.scores(0),
            Err(PipelineError::ModelNotTrained)
        ));
    }

    #[test]
    fn test_scores_unknown_user() {
        let rows = vec![row(0, 0, 1.0)];
        let matrix = SparseMatrix::from_interactions(&rows);
        let mut mf = MatrixFactorization::new(small_settings());
        mf.fit(&matrix).unwrap();

        assert!(matches!(mf.scores(5), Err(PipelineError::UnknownUser(5))));
    }

    #[test]
    fn test_solve_cholesky_identity() {
        let a = Array2::<f64>::eye(3);
        let b = Array1::from(vec![1.0, 2.0, 3.0]);
        let x = solve_cholesky(&a, &b).unwrap();
        for (got, expected) in x.iter().zip([1.0, 2.0, 3.0]) {
            assert!((got - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_solve_cholesky_rejects_indefinite() {
        let mut a = Array2::<f64>::eye(2);
        a[[0, 0]] = -1.0;
        let b = Array1::from(vec![1.0, 1.0]);
        assert!(matches!(
            solve_cholesky(&a, &b),
            Err(PipelineError::Factorization(_))
        ));
    }
}
