//! Linear algebra utilities for the EM pipelines.
//!
//! This module provides the factored shared covariance used by the E-step and
//! the log-likelihood pipeline, rank-one accumulation for the M-step sums and
//! conversions between nested vectors and nalgebra matrices.

use std::f64::consts::PI;

use crate::error::{GmmError, Result};
use crate::types::{Matrix, Vector};

/// Smallest accepted ratio of the smallest to the largest singular value.
pub const MIN_RECIPROCAL_CONDITION: f64 = 1e-12;

/// A covariance matrix inverted once and reused for every row.
#[derive(Debug, Clone)]
pub struct SharedCovariance {
    matrix: Matrix,
    inverse: Matrix,
    determinant: f64,
}

impl SharedCovariance {
    /// Factor `matrix`, failing if it is singular or too badly conditioned to
    /// invert reliably.
    pub fn new(matrix: Matrix) -> Result<Self> {
        if !matrix.is_square() || matrix.nrows() == 0 {
            return Err(GmmError::invalid_argument(format!(
                "covariance must be a non-empty square matrix, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(GmmError::singular_covariance(
                "covariance matrix has non-finite entries",
            ));
        }

        let singular_values = matrix.singular_values();
        let (smallest, largest) = (singular_values.min(), singular_values.max());
        if largest <= 0.0 || smallest / largest < MIN_RECIPROCAL_CONDITION {
            return Err(GmmError::singular_covariance(format!(
                "near-singular covariance matrix (singular values {smallest:e} / {largest:e})"
            )));
        }

        let lu = matrix.clone().lu();
        let determinant = lu.determinant();
        if determinant == 0.0 || !determinant.is_finite() {
            return Err(GmmError::singular_covariance(format!(
                "singular covariance matrix (determinant {determinant})"
            )));
        }

        let inverse = lu
            .try_inverse()
            .ok_or_else(|| GmmError::singular_covariance("singular covariance matrix"))?;
        if inverse.iter().any(|v| !v.is_finite()) {
            return Err(GmmError::singular_covariance(
                "near-singular covariance matrix: inverse is not finite",
            ));
        }

        Ok(Self {
            matrix,
            inverse,
            determinant,
        })
    }

    /// The original matrix.
    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    /// The inverse matrix.
    pub fn inverse(&self) -> &Matrix {
        &self.inverse
    }

    /// The determinant (may be negative for an indefinite matrix).
    pub fn determinant(&self) -> f64 {
        self.determinant
    }

    /// Dimensionality.
    pub fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    /// Squared Mahalanobis distance of a deviation vector.
    #[inline]
    pub fn mahalanobis_sq(&self, diff: &Vector) -> f64 {
        diff.dot(&(&self.inverse * diff))
    }

    /// `-(d/2) * ln(2π · det)`, the per-row constant of the log density.
    pub fn log_normalizer(&self) -> Result<f64> {
        if self.determinant <= 0.0 {
            return Err(GmmError::non_positive_determinant(self.determinant));
        }
        let d = self.dim() as f64;
        Ok(-(d / 2.0) * (2.0 * PI * self.determinant).ln())
    }
}

/// Deviation of `x` from row `cluster` of the mean matrix.
#[inline]
pub fn deviation(x: &Vector, means: &Matrix, cluster: usize) -> Vector {
    x - means.row(cluster).transpose()
}

/// `target += scale * v * vᵀ`.
///
/// Each off-diagonal product is computed once and added to both mirrored
/// entries, so a symmetric `target` stays exactly symmetric.
#[inline]
pub fn accumulate_outer(target: &mut Matrix, v: &Vector, scale: f64) {
    let n = v.len();
    for j in 0..n {
        let sv = scale * v[j];
        target[(j, j)] += sv * v[j];
        for i in (j + 1)..n {
            let val = sv * v[i];
            target[(i, j)] += val;
            target[(j, i)] += val;
        }
    }
}

/// Add `reg` to every diagonal entry.
pub fn regularize(matrix: &mut Matrix, reg: f64) {
    if reg == 0.0 {
        return;
    }
    for i in 0..matrix.nrows().min(matrix.ncols()) {
        matrix[(i, i)] += reg;
    }
}

/// Check `m[i][j] == m[j][i]` within `tol` (relative to the larger entry).
pub fn is_symmetric(matrix: &Matrix, tol: f64) -> bool {
    if !matrix.is_square() {
        return false;
    }
    let n = matrix.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let a = matrix[(i, j)];
            let b = matrix[(j, i)];
            let scale = a.abs().max(b.abs()).max(1.0);
            if (a - b).abs() > tol * scale {
                return false;
            }
        }
    }
    true
}

/// Convert nested rows to a matrix, rejecting ragged input.
pub fn vecs_to_matrix(vecs: &[Vec<f64>]) -> Result<Matrix> {
    if vecs.is_empty() {
        return Ok(Matrix::zeros(0, 0));
    }
    let n_rows = vecs.len();
    let n_cols = vecs[0].len();
    let mut matrix = Matrix::zeros(n_rows, n_cols);
    for (i, vec) in vecs.iter().enumerate() {
        if vec.len() != n_cols {
            return Err(GmmError::invalid_argument(format!(
                "row {i} has {} columns, expected {n_cols}",
                vec.len()
            )));
        }
        for (j, &val) in vec.iter().enumerate() {
            matrix[(i, j)] = val;
        }
    }
    Ok(matrix)
}

/// Convert a matrix to nested rows.
pub fn matrix_to_vecs(matrix: &Matrix) -> Vec<Vec<f64>> {
    let mut vecs = Vec::with_capacity(matrix.nrows());
    for row in matrix.row_iter() {
        vecs.push(row.iter().cloned().collect());
    }
    vecs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_covariance_inverse() {
        let cov = Matrix::from_row_slice(2, 2, &[
            2.0, 0.0,
            0.0, 4.0,
        ]);
        let shared = SharedCovariance::new(cov).unwrap();
        assert!((shared.determinant() - 8.0).abs() < 1e-12);
        assert!((shared.inverse()[(0, 0)] - 0.5).abs() < 1e-12);
        assert!((shared.inverse()[(1, 1)] - 0.25).abs() < 1e-12);

        let diff = Vector::from_vec(vec![2.0, 2.0]);
        // 4 / 2 + 4 / 4
        assert!((shared.mahalanobis_sq(&diff) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_singular_covariance_rejected() {
        let cov = Matrix::from_row_slice(2, 2, &[
            1.0, 2.0,
            2.0, 4.0,
        ]);
        let err = SharedCovariance::new(cov).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::SingularCovariance);

        let nan = Matrix::from_element(2, 2, f64::NAN);
        assert!(SharedCovariance::new(nan).is_err());
    }

    #[test]
    fn test_near_singular_covariance_rejected() {
        let cov = Matrix::from_row_slice(2, 2, &[
            1.0, 1.0,
            1.0, 1.0 + 1e-15,
        ]);
        let err = SharedCovariance::new(cov).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::SingularCovariance);
        assert!(err.is_numerical());

        // Badly scaled but well within tolerance.
        let scaled = Matrix::from_row_slice(2, 2, &[
            1.0, 0.0,
            0.0, 1e-10,
        ]);
        let shared = SharedCovariance::new(scaled).unwrap();
        assert!((shared.inverse()[(1, 1)] - 1e10).abs() < 1.0);
    }

    #[test]
    fn test_log_normalizer() {
        let shared = SharedCovariance::new(Matrix::identity(2, 2)).unwrap();
        let c = shared.log_normalizer().unwrap();
        assert!((c + (2.0 * PI).ln()).abs() < 1e-12);

        // Invertible but indefinite: det < 0.
        let indefinite = Matrix::from_row_slice(2, 2, &[
            0.0, 1.0,
            1.0, 0.0,
        ]);
        let shared = SharedCovariance::new(indefinite).unwrap();
        let err = shared.log_normalizer().unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::NonPositiveDeterminant);
    }

    #[test]
    fn test_accumulate_outer_is_symmetric() {
        let mut m = Matrix::zeros(3, 3);
        accumulate_outer(&mut m, &Vector::from_vec(vec![1.0, -2.0, 3.0]), 0.5);
        accumulate_outer(&mut m, &Vector::from_vec(vec![0.3, 0.1, -7.0]), 2.0);
        assert!(is_symmetric(&m, 0.0));
        assert!((m[(0, 1)] - (-1.0 + 0.06)).abs() < 1e-12);
    }

    #[test]
    fn test_regularize() {
        let mut m = Matrix::zeros(2, 2);
        regularize(&mut m, 0.1);
        assert_eq!(m[(0, 0)], 0.1);
        assert_eq!(m[(0, 1)], 0.0);
    }

    #[test]
    fn test_vecs_round_trip() {
        let vecs = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let m = vecs_to_matrix(&vecs).unwrap();
        assert_eq!(m[(1, 0)], 3.0);
        assert_eq!(matrix_to_vecs(&m), vecs);
        assert!(vecs_to_matrix(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }
}
