//! E-step: cluster responsibilities for a single data point.
//!
//! The covariance is factored once when the estimator is built and reused for
//! every row. Scores are computed per cluster from the squared Mahalanobis
//! distance `q_i` and normalized to sum to one:
//!
//! - [`ScoreForm::Legacy`]: `s_i = exp(-0.5 · q_i · w_i)`
//! - [`ScoreForm::Textbook`]: `s_i = w_i · exp(-0.5 · q_i)`
//!
//! In the log domain the same scores are normalized with log-sum-exp, which
//! cannot underflow to an all-zero vector.

use crate::config::ScoreForm;
use crate::error::{GmmError, PipelineExt, Result};
use crate::types::{Matrix, MixtureParams, Pipeline, Vector};
use crate::utils::{deviation, SharedCovariance};

/// Computes responsibility vectors against fixed mixture parameters.
#[derive(Debug, Clone)]
pub struct ResponsibilityEstimator {
    weights: Vector,
    means: Matrix,
    covariance: SharedCovariance,
    score_form: ScoreForm,
    log_domain: bool,
}

impl ResponsibilityEstimator {
    /// Build an estimator, inverting the covariance.
    pub fn new(params: &MixtureParams) -> Result<Self> {
        params.validate().in_pipeline(Pipeline::Responsibility)?;
        if let Some((i, w)) = params
            .weights
            .iter()
            .enumerate()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(GmmError::invalid_argument(format!(
                "mixture weight {i} is {w}, expected a finite non-negative value"
            ))
            .in_pipeline(Pipeline::Responsibility));
        }
        let covariance = SharedCovariance::new(params.covariance.clone())
            .in_pipeline(Pipeline::Responsibility)?;

        Ok(Self {
            weights: params.weights.clone(),
            means: params.means.clone(),
            covariance,
            score_form: ScoreForm::default(),
            log_domain: false,
        })
    }

    /// Set the score formula.
    pub fn with_score_form(mut self, form: ScoreForm) -> Self {
        self.score_form = form;
        self
    }

    /// Normalize in the log domain.
    pub fn with_log_domain(mut self, enabled: bool) -> Self {
        self.log_domain = enabled;
        self
    }

    /// Number of clusters.
    pub fn num_clusters(&self) -> usize {
        self.weights.len()
    }

    /// The factored covariance.
    pub fn covariance(&self) -> &SharedCovariance {
        &self.covariance
    }

    /// Responsibilities of every cluster for `x`.
    pub fn estimate(&self, x: &[f64]) -> Result<Vector> {
        self.estimate_inner(x).in_pipeline(Pipeline::Responsibility)
    }

    fn estimate_inner(&self, x: &[f64]) -> Result<Vector> {
        let d = self.means.ncols();
        if x.len() != d {
            return Err(GmmError::invalid_argument(format!(
                "data point has {} features, expected {d}",
                x.len()
            )));
        }

        let xv = Vector::from_column_slice(x);
        let k = self.num_clusters();
        let mut scores = Vector::zeros(k);
        for i in 0..k {
            let q = self.covariance.mahalanobis_sq(&deviation(&xv, &self.means, i));
            let w = self.weights[i];
            scores[i] = match (self.score_form, self.log_domain) {
                (ScoreForm::Legacy, false) => (-0.5 * q * w).exp(),
                (ScoreForm::Legacy, true) => -0.5 * q * w,
                (ScoreForm::Textbook, false) => w * (-0.5 * q).exp(),
                (ScoreForm::Textbook, true) => w.ln() - 0.5 * q,
            };
        }

        if self.log_domain {
            let max = scores.max();
            if !max.is_finite() {
                return Err(GmmError::score_underflow(format!(
                    "largest log score is {max}"
                )));
            }
            scores.apply(|s| *s = (*s - max).exp());
        }

        let sum = scores.sum();
        if sum <= 0.0 || !sum.is_finite() {
            return Err(GmmError::score_underflow(format!(
                "responsibility scores sum to {sum}"
            )));
        }
        scores /= sum;
        Ok(scores)
    }
}

/// Responsibilities of `x` under the given parameters, legacy score form.
pub fn responsibilities(
    x: &[f64],
    weights: &Vector,
    means: &Matrix,
    covariance: &Matrix,
) -> Result<Vector> {
    let params = MixtureParams::new(weights.clone(), means.clone(), covariance.clone())
        .in_pipeline(Pipeline::Responsibility)?;
    ResponsibilityEstimator::new(&params)?.estimate(x)
}
