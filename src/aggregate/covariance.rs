//! Shared covariance update.
//!
//! Every row contributes `z_i / w_i · (x − μ_i)(x − μ_i)ᵀ` for each cluster,
//! where `μ` are the means just produced by the weight/mean pipeline and `w`
//! is the weight vector chosen by the caller. The sum is divided by
//! `rows_seen × num_clusters` at finalize.

use serde::{Deserialize, Serialize};

use super::Aggregate;
use crate::error::{GmmError, Result};
use crate::types::{Matrix, Pipeline, Vector};
use crate::utils::{accumulate_outer, deviation};

/// One row of input.
#[derive(Debug, Clone, Copy, Default)]
pub struct CovarianceRow<'a> {
    /// Data point, length `d`.
    pub x: Option<&'a [f64]>,
    /// Responsibility vector, length `k`.
    pub z: Option<&'a [f64]>,
    /// Mixture weights dividing each cluster's contribution, length `k`.
    pub weights: Option<&'a [f64]>,
    /// Cluster means, `k × d`.
    pub means: Option<&'a Matrix>,
}

impl<'a> CovarianceRow<'a> {
    /// A row with every input present.
    pub fn new(x: &'a [f64], z: &'a [f64], weights: &'a [f64], means: &'a Matrix) -> Self {
        Self {
            x: Some(x),
            z: Some(z),
            weights: Some(weights),
            means: Some(means),
        }
    }
}

/// Partial sum of weighted deviation outer products.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceState {
    pub(crate) iteration: u32,
    pub(crate) width_of_x: usize,
    pub(crate) num_clusters: usize,
    pub(crate) rows_seen: u64,
    pub(crate) covar_sum: Matrix,
}

impl Default for CovarianceState {
    fn default() -> Self {
        Self {
            iteration: 0,
            width_of_x: 0,
            num_clusters: 0,
            rows_seen: 0,
            covar_sum: Matrix::zeros(0, 0),
        }
    }
}

impl CovarianceState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Iteration counter, bumped by finalize.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Dimensionality, or 0 before the first row.
    pub fn width_of_x(&self) -> usize {
        self.width_of_x
    }

    /// Number of clusters, or 0 before the first row.
    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    /// Rows folded into this state.
    pub fn rows_seen(&self) -> u64 {
        self.rows_seen
    }

    /// Running outer-product sum.
    pub fn covar_sum(&self) -> &Matrix {
        &self.covar_sum
    }

    fn check_row(
        (d, k): (usize, usize),
        x: &[f64],
        z: &[f64],
        weights: &[f64],
        means: &Matrix,
    ) -> Result<()> {
        if x.len() != d || z.len() != k {
            return Err(GmmError::invalid_argument(format!(
                "row shape ({}, {}) does not match state shape ({d}, {k})",
                x.len(),
                z.len()
            )));
        }
        if weights.len() != k || means.nrows() != k || means.ncols() != d {
            return Err(GmmError::invalid_argument(format!(
                "parameters ({} weights, {}x{} means) do not match state shape ({d}, {k})",
                weights.len(),
                means.nrows(),
                means.ncols()
            )));
        }
        Ok(())
    }
}

/// Updated shared covariance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceUpdate {
    /// Covariance matrix, `d × d`, symmetric.
    pub covariance: Matrix,
    /// Iteration counter after finalize.
    pub iteration: u32,
    /// Rows that contributed.
    pub rows_seen: u64,
}

impl Aggregate for CovarianceState {
    type Row<'a> = CovarianceRow<'a>;
    type Output = CovarianceUpdate;

    const PIPELINE: Pipeline = Pipeline::Covariance;

    fn identity() -> Self {
        Self::default()
    }

    fn is_identity(&self) -> bool {
        self.rows_seen == 0
    }

    fn fold(&mut self, row: CovarianceRow<'_>) -> Result<()> {
        let (x, z, weights, means) = match (row.x, row.z, row.weights, row.means) {
            (Some(x), Some(z), Some(w), Some(m)) => (x, z, w, m),
            _ => return Ok(()),
        };

        let shape = if self.rows_seen == 0 {
            if x.is_empty() || z.is_empty() {
                return Err(GmmError::invalid_argument(
                    "cannot initialize from an empty row",
                ));
            }
            (x.len(), z.len())
        } else {
            (self.width_of_x, self.num_clusters)
        };
        Self::check_row(shape, x, z, weights, means)?;

        let xv = Vector::from_column_slice(x);
        let mut contributions = Vec::with_capacity(shape.1);
        for (i, (&zi, &wi)) in z.iter().zip(weights).enumerate() {
            if wi <= 0.0 || !wi.is_finite() {
                return Err(GmmError::degenerate_cluster(
                    i,
                    format!("mixture weight {wi} cannot scale a covariance contribution"),
                ));
            }
            contributions.push((deviation(&xv, means, i), zi / wi));
        }

        // Validated up front so a failing row leaves the state untouched.
        if self.rows_seen == 0 {
            self.width_of_x = shape.0;
            self.num_clusters = shape.1;
            self.covar_sum = Matrix::zeros(shape.0, shape.0);
        }
        self.rows_seen += 1;
        for (diff, scale) in &contributions {
            accumulate_outer(&mut self.covar_sum, diff, *scale);
        }
        Ok(())
    }

    fn combine(mut self, other: Self) -> Result<Self> {
        if self.rows_seen == 0 {
            return Ok(other);
        }
        if other.rows_seen == 0 {
            return Ok(self);
        }
        if self.width_of_x != other.width_of_x || self.num_clusters != other.num_clusters {
            return Err(GmmError::incompatible_state(format!(
                "cannot combine states of shape ({}, {}) and ({}, {})",
                self.width_of_x, self.num_clusters, other.width_of_x, other.num_clusters
            )));
        }

        self.rows_seen += other.rows_seen;
        self.covar_sum += &other.covar_sum;
        Ok(self)
    }

    fn finalize(mut self) -> Result<CovarianceUpdate> {
        if self.rows_seen == 0 {
            return Err(GmmError::empty_aggregate("no rows were folded"));
        }

        let denom = self.rows_seen as f64 * self.num_clusters as f64;
        self.covar_sum /= denom;
        self.iteration += 1;

        Ok(CovarianceUpdate {
            covariance: self.covar_sum,
            iteration: self.iteration,
            rows_seen: self.rows_seen,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::fold_rows;
    use crate::error::ErrorCode;
    use crate::utils::is_symmetric;

    fn means() -> Matrix {
        Matrix::from_row_slice(2, 2, &[
            0.0, 0.5,
            10.0, 10.5,
        ])
    }

    fn points() -> Vec<(Vec<f64>, Vec<f64>)> {
        vec![
            (vec![0.0, 0.0], vec![1.0, 0.0]),
            (vec![0.0, 1.0], vec![1.0, 0.0]),
            (vec![10.0, 10.0], vec![0.0, 1.0]),
            (vec![10.0, 11.0], vec![0.0, 1.0]),
        ]
    }

    fn fold(points: &[(Vec<f64>, Vec<f64>)], weights: &[f64], means: &Matrix) -> CovarianceState {
        fold_rows(
            points
                .iter()
                .map(|(x, z)| CovarianceRow::new(x, z, weights, means)),
        )
        .unwrap()
    }

    #[test]
    fn test_hard_assignments() {
        let m = means();
        let state = fold(&points(), &[0.5, 0.5], &m);
        assert_eq!(state.rows_seen(), 4);
        assert_eq!(state.num_clusters(), 2);

        let update = state.finalize().unwrap();
        // Each row contributes (0, ±0.5)ᵀ(0, ±0.5) / 0.5; four rows over 4 × 2.
        assert!(update.covariance[(0, 0)].abs() < 1e-12);
        assert!(update.covariance[(0, 1)].abs() < 1e-12);
        assert!((update.covariance[(1, 1)] - 0.25).abs() < 1e-12);
        assert_eq!(update.iteration, 1);
    }

    #[test]
    fn test_symmetric_for_soft_assignments() {
        let m = Matrix::from_row_slice(2, 3, &[
            0.1, -0.3, 2.0,
            4.0, 1.0, -1.5,
        ]);
        let rows = vec![
            (vec![0.3, 1.7, -2.2], vec![0.3, 0.7]),
            (vec![-4.0, 0.25, 9.0], vec![0.9, 0.1]),
            (vec![1.0, 1.0, 1.0], vec![0.5, 0.5]),
        ];
        let update = fold(&rows, &[0.4, 0.6], &m).finalize().unwrap();
        assert!(is_symmetric(&update.covariance, 0.0));
    }

    #[test]
    fn test_missing_inputs_are_skipped() {
        let m = means();
        let mut state = CovarianceState::new();
        state
            .fold(CovarianceRow {
                means: None,
                ..CovarianceRow::new(&[0.0, 0.0], &[1.0, 0.0], &[0.5, 0.5], &m)
            })
            .unwrap();
        state
            .fold(CovarianceRow {
                weights: None,
                ..CovarianceRow::new(&[0.0, 0.0], &[1.0, 0.0], &[0.5, 0.5], &m)
            })
            .unwrap();
        assert!(state.is_identity());
    }

    #[test]
    fn test_zero_weight_is_degenerate() {
        let m = means();
        let mut state = CovarianceState::new();
        let err = state
            .fold(CovarianceRow::new(&[0.0, 0.0], &[1.0, 0.0], &[1.0, 0.0], &m))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DegenerateCluster);
        assert_eq!(state, CovarianceState::identity());
    }

    #[test]
    fn test_failed_first_row_leaves_identity() {
        let m = Matrix::zeros(3, 2);
        let mut state = CovarianceState::new();
        assert!(state
            .fold(CovarianceRow::new(&[0.0, 0.0], &[1.0, 0.0], &[0.5, 0.5], &m))
            .is_err());
        assert_eq!(state, CovarianceState::identity());

        // The next valid row still initializes the state from scratch.
        let m = Matrix::zeros(1, 3);
        state
            .fold(CovarianceRow::new(&[1.0, 0.0, 0.0], &[1.0], &[1.0], &m))
            .unwrap();
        assert_eq!(state.width_of_x(), 3);
        assert_eq!(state.num_clusters(), 1);
    }

    #[test]
    fn test_mean_shape_mismatch() {
        let m = Matrix::zeros(3, 2);
        let mut state = CovarianceState::new();
        let err = state
            .fold(CovarianceRow::new(&[0.0, 0.0], &[1.0, 0.0], &[0.5, 0.5], &m))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_combine_matches_single_pass() {
        let m = means();
        let w = [0.5, 0.5];
        let all = points();
        let whole = fold(&all, &w, &m);
        let merged = fold(&all[2..], &w, &m)
            .combine(CovarianceState::identity())
            .unwrap()
            .combine(fold(&all[..2], &w, &m))
            .unwrap();
        assert_eq!(merged.rows_seen(), 4);
        assert!((merged.covar_sum() - whole.covar_sum()).norm() < 1e-12);
    }

    #[test]
    fn test_combine_incompatible() {
        let m = means();
        let a = fold(&points(), &[0.5, 0.5], &m);
        let m3 = Matrix::zeros(1, 3);
        let mut b = CovarianceState::new();
        b.fold(CovarianceRow::new(&[1.0, 2.0, 3.0], &[1.0], &[1.0], &m3))
            .unwrap();
        let err = b.combine(a).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IncompatibleState);
    }
}
