//! Log-likelihood accumulation for convergence monitoring.

use serde::{Deserialize, Serialize};

use super::Aggregate;
use crate::error::{GmmError, Result};
use crate::types::{Matrix, Pipeline, Vector};
use crate::utils::{deviation, SharedCovariance};

/// One row of input.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogLikelihoodRow<'a> {
    /// Data point, length `d`.
    pub x: Option<&'a [f64]>,
    /// Responsibility vector, length `k`.
    pub z: Option<&'a [f64]>,
    /// Mixture weights, length `k`.
    pub weights: Option<&'a [f64]>,
    /// Cluster means, `k × d`.
    pub means: Option<&'a Matrix>,
    /// Factored shared covariance.
    pub covariance: Option<&'a SharedCovariance>,
}

impl<'a> LogLikelihoodRow<'a> {
    /// A row with every input present.
    pub fn new(
        x: &'a [f64],
        z: &'a [f64],
        weights: &'a [f64],
        means: &'a Matrix,
        covariance: &'a SharedCovariance,
    ) -> Self {
        Self {
            x: Some(x),
            z: Some(z),
            weights: Some(weights),
            means: Some(means),
            covariance: Some(covariance),
        }
    }
}

/// Running sum of responsibility-weighted log densities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LogLikelihood {
    pub(crate) total: f64,
    pub(crate) rows_seen: u64,
}

impl LogLikelihood {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// The running total.
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Rows folded into this accumulator.
    pub fn rows_seen(&self) -> u64 {
        self.rows_seen
    }
}

impl Aggregate for LogLikelihood {
    type Row<'a> = LogLikelihoodRow<'a>;
    type Output = f64;

    const PIPELINE: Pipeline = Pipeline::LogLikelihood;

    fn identity() -> Self {
        Self::default()
    }

    fn is_identity(&self) -> bool {
        self.rows_seen == 0
    }

    fn fold(&mut self, row: LogLikelihoodRow<'_>) -> Result<()> {
        let (x, z, weights, means, cov) =
            match (row.x, row.z, row.weights, row.means, row.covariance) {
                (Some(x), Some(z), Some(w), Some(m), Some(c)) => (x, z, w, m, c),
                _ => return Ok(()),
            };

        let (d, k) = (x.len(), z.len());
        if d == 0 || k == 0 || weights.len() != k || means.nrows() != k {
            return Err(GmmError::invalid_argument(format!(
                "row with {d} features and {k} responsibilities does not match {} weights and {} means",
                weights.len(),
                means.nrows()
            )));
        }
        if means.ncols() != d || cov.dim() != d {
            return Err(GmmError::invalid_argument(format!(
                "row with {d} features does not match {}-column means and {}x{} covariance",
                means.ncols(),
                cov.dim(),
                cov.dim()
            )));
        }

        let constant = cov.log_normalizer()?;
        let xv = Vector::from_column_slice(x);

        let mut row_total = 0.0;
        for (i, (&zi, &wi)) in z.iter().zip(weights).enumerate() {
            if wi <= 0.0 || !wi.is_finite() {
                return Err(GmmError::degenerate_cluster(
                    i,
                    format!("log of non-positive mixture weight {wi}"),
                ));
            }
            let q = cov.mahalanobis_sq(&deviation(&xv, means, i));
            row_total += zi * (constant - 0.5 * q + wi.ln());
        }

        self.total += row_total;
        self.rows_seen += 1;
        Ok(())
    }

    fn combine(self, other: Self) -> Result<Self> {
        Ok(Self {
            total: self.total + other.total,
            rows_seen: self.rows_seen + other.rows_seen,
        })
    }

    fn finalize(self) -> Result<f64> {
        if !self.total.is_finite() {
            return Err(GmmError::invalid_argument(format!(
                "log-likelihood total {} is not finite",
                self.total
            )));
        }
        Ok(self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::fold_rows;
    use crate::error::ErrorCode;
    use std::f64::consts::PI;

    #[test]
    fn test_single_cluster_standard_normal() {
        let cov = SharedCovariance::new(Matrix::identity(2, 2)).unwrap();
        let means = Matrix::zeros(1, 2);
        let x = [1.0, 1.0];
        let ll: LogLikelihood =
            fold_rows([LogLikelihoodRow::new(&x, &[1.0], &[1.0], &means, &cov)]).unwrap();
        // -(2/2) ln(2π) - 0.5 * 2
        let expected = -(2.0 * PI).ln() - 1.0;
        assert!((ll.finalize().unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_weight_term() {
        let cov = SharedCovariance::new(Matrix::identity(1, 1)).unwrap();
        let means = Matrix::from_row_slice(2, 1, &[0.0, 0.0]);
        let x = [0.0];
        let ll: LogLikelihood =
            fold_rows([LogLikelihoodRow::new(&x, &[0.5, 0.5], &[0.25, 0.75], &means, &cov)])
                .unwrap();
        let c = -0.5 * (2.0 * PI).ln();
        let expected = 0.5 * (c + 0.25f64.ln()) + 0.5 * (c + 0.75f64.ln());
        assert!((ll.total() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_missing_inputs_are_skipped() {
        let cov = SharedCovariance::new(Matrix::identity(1, 1)).unwrap();
        let means = Matrix::zeros(1, 1);
        let mut ll = LogLikelihood::new();
        ll.fold(LogLikelihoodRow {
            covariance: None,
            ..LogLikelihoodRow::new(&[0.0], &[1.0], &[1.0], &means, &cov)
        })
        .unwrap();
        assert!(ll.is_identity());
        assert_eq!(ll.total(), 0.0);
    }

    #[test]
    fn test_non_positive_determinant() {
        let indefinite = Matrix::from_row_slice(2, 2, &[
            0.0, 1.0,
            1.0, 0.0,
        ]);
        let cov = SharedCovariance::new(indefinite).unwrap();
        let means = Matrix::zeros(1, 2);
        let mut ll = LogLikelihood::new();
        let err = ll
            .fold(LogLikelihoodRow::new(&[0.0, 0.0], &[1.0], &[1.0], &means, &cov))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NonPositiveDeterminant);
        assert!(ll.is_identity());
    }

    #[test]
    fn test_non_positive_weight_is_degenerate() {
        let cov = SharedCovariance::new(Matrix::identity(1, 1)).unwrap();
        let means = Matrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let mut ll = LogLikelihood::new();
        for weights in [[0.5, 0.0], [0.5, -0.25]] {
            let err = ll
                .fold(LogLikelihoodRow::new(&[0.5], &[0.5, 0.5], &weights, &means, &cov))
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::DegenerateCluster);
            assert!(err.message().contains("cluster 1"));
        }
        assert!(ll.is_identity());
        assert_eq!(ll.total(), 0.0);
    }

    #[test]
    fn test_combine_is_addition() {
        let a = LogLikelihood { total: -3.5, rows_seen: 2 };
        let b = LogLikelihood { total: -1.25, rows_seen: 1 };
        let ab = a.combine(b).unwrap();
        let ba = b.combine(a).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.total(), -4.75);
        assert_eq!(a.combine(LogLikelihood::identity()).unwrap(), a);
    }
}
