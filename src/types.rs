//! Core type definitions.
//!
//! Dense vectors and matrices are nalgebra `f64` containers. Means are stored
//! one row per cluster.

use std::fmt;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{GmmError, Result};

/// Dense column vector.
pub type Vector = DVector<f64>;

/// Dense matrix.
pub type Matrix = DMatrix<f64>;

/// The stage of an EM iteration that produced a value or an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pipeline {
    /// E-step responsibility estimation.
    Responsibility,
    /// Mixture weight and mean update.
    WeightMean,
    /// Shared covariance update.
    Covariance,
    /// Log-likelihood accumulation.
    LogLikelihood,
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pipeline::Responsibility => write!(f, "responsibility"),
            Pipeline::WeightMean => write!(f, "weight/mean"),
            Pipeline::Covariance => write!(f, "covariance"),
            Pipeline::LogLikelihood => write!(f, "log-likelihood"),
        }
    }
}

/// Parameters of a mixture with one covariance shared by all clusters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixtureParams {
    /// Mixture weights, length `k`.
    pub weights: Vector,
    /// Cluster means, `k × d`.
    pub means: Matrix,
    /// Shared covariance, `d × d`.
    pub covariance: Matrix,
}

impl MixtureParams {
    /// Build parameters, checking that the shapes agree.
    pub fn new(weights: Vector, means: Matrix, covariance: Matrix) -> Result<Self> {
        let params = Self {
            weights,
            means,
            covariance,
        };
        params.validate()?;
        Ok(params)
    }

    /// Build parameters from nested vectors.
    pub fn from_vecs(
        weights: Vec<f64>,
        means: &[Vec<f64>],
        covariance: &[Vec<f64>],
    ) -> Result<Self> {
        let means = crate::utils::vecs_to_matrix(means)?;
        let covariance = crate::utils::vecs_to_matrix(covariance)?;
        Self::new(Vector::from_vec(weights), means, covariance)
    }

    /// Number of clusters.
    pub fn num_clusters(&self) -> usize {
        self.weights.len()
    }

    /// Dimensionality of a data point.
    pub fn dimensionality(&self) -> usize {
        self.means.ncols()
    }

    /// Check shape consistency.
    pub fn validate(&self) -> Result<()> {
        let k = self.weights.len();
        let d = self.means.ncols();
        if k == 0 {
            return Err(GmmError::invalid_argument("mixture needs at least one cluster"));
        }
        if self.means.nrows() != k {
            return Err(GmmError::invalid_argument(format!(
                "mean matrix has {} rows for {} weights",
                self.means.nrows(),
                k
            )));
        }
        if self.covariance.nrows() != d || self.covariance.ncols() != d {
            return Err(GmmError::invalid_argument(format!(
                "covariance is {}x{}, expected {}x{}",
                self.covariance.nrows(),
                self.covariance.ncols(),
                d,
                d
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_shape_check() {
        let ok = MixtureParams::from_vecs(
            vec![0.5, 0.5],
            &[vec![0.0, 0.0], vec![1.0, 1.0]],
            &[vec![1.0, 0.0], vec![0.0, 1.0]],
        )
        .unwrap();
        assert_eq!(ok.num_clusters(), 2);
        assert_eq!(ok.dimensionality(), 2);

        let bad = MixtureParams::new(
            Vector::from_vec(vec![1.0]),
            Matrix::zeros(2, 2),
            Matrix::identity(2, 2),
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_pipeline_display() {
        assert_eq!(Pipeline::Covariance.to_string(), "covariance");
        assert_eq!(Pipeline::LogLikelihood.to_string(), "log-likelihood");
    }
}
