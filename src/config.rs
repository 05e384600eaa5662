//! Configuration for EM runs.

use serde::{Deserialize, Serialize};

use crate::error::{GmmError, Result};

/// How the E-step turns a Mahalanobis distance into an unnormalized score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreForm {
    /// `exp(-0.5 * q * w)`: the weight scales the exponent.
    #[default]
    Legacy,
    /// `w * exp(-0.5 * q)`: the standard posterior for a shared covariance.
    Textbook,
}

/// Which weight vector divides the covariance contributions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceWeights {
    /// Weights of the previous iteration, alongside the fresh means.
    #[default]
    Previous,
    /// Weights just produced by the weight/mean pipeline.
    Current,
}

/// Configuration for an EM run over partitioned data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmConfig {
    /// Maximum number of EM iterations.
    pub max_iterations: usize,
    /// Stop when the log-likelihood changes by less than this.
    pub tolerance: f64,
    /// Ridge added to the covariance diagonal after each update.
    pub reg_covar: f64,
    /// Number of partitions rows are split into.
    pub num_partitions: usize,
    /// Below this many rows, partitions are reduced sequentially.
    pub min_parallel_rows: usize,
    /// E-step score formula.
    pub score_form: ScoreForm,
    /// Normalize E-step scores in the log domain.
    pub log_domain_scores: bool,
    /// Weights fed to the covariance pipeline.
    pub covariance_weights: CovarianceWeights,
}

impl Default for EmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-6,
            reg_covar: 1e-6,
            num_partitions: 1,
            min_parallel_rows: crate::utils::MIN_PARALLEL_SIZE,
            score_form: ScoreForm::Legacy,
            log_domain_scores: false,
            covariance_weights: CovarianceWeights::Previous,
        }
    }
}

impl EmConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set max iterations.
    pub fn with_max_iterations(mut self, max_iter: usize) -> Self {
        self.max_iterations = max_iter;
        self
    }

    /// Set the convergence tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the covariance ridge.
    pub fn with_reg_covar(mut self, reg: f64) -> Self {
        self.reg_covar = reg;
        self
    }

    /// Set the number of partitions.
    pub fn with_partitions(mut self, n: usize) -> Self {
        self.num_partitions = n;
        self
    }

    /// Set the sequential fallback threshold.
    pub fn with_min_parallel_rows(mut self, n: usize) -> Self {
        self.min_parallel_rows = n;
        self
    }

    /// Set the E-step score form.
    pub fn with_score_form(mut self, form: ScoreForm) -> Self {
        self.score_form = form;
        self
    }

    /// Enable log-sum-exp normalization in the E-step.
    pub fn with_log_domain_scores(mut self, enabled: bool) -> Self {
        self.log_domain_scores = enabled;
        self
    }

    /// Set which weights the covariance pipeline divides by.
    pub fn with_covariance_weights(mut self, weights: CovarianceWeights) -> Self {
        self.covariance_weights = weights;
        self
    }

    /// Reject configurations no run could use.
    pub fn validate(&self) -> Result<()> {
        if self.num_partitions == 0 {
            return Err(GmmError::invalid_argument("num_partitions must be > 0"));
        }
        if self.tolerance.is_nan() || self.tolerance < 0.0 {
            return Err(GmmError::invalid_argument("tolerance must be >= 0"));
        }
        if !self.reg_covar.is_finite() || self.reg_covar < 0.0 {
            return Err(GmmError::invalid_argument("reg_covar must be finite and >= 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EmConfig::default();
        assert_eq!(config.num_partitions, 1);
        assert_eq!(config.score_form, ScoreForm::Legacy);
        assert_eq!(config.covariance_weights, CovarianceWeights::Previous);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        assert!(EmConfig::new().with_partitions(0).validate().is_err());
        assert!(EmConfig::new().with_tolerance(f64::NAN).validate().is_err());
        assert!(EmConfig::new().with_reg_covar(-1.0).validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = EmConfig::new()
            .with_partitions(4)
            .with_score_form(ScoreForm::Textbook);

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"textbook\""));
        let deserialized: EmConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.num_partitions, 4);
        assert_eq!(deserialized.score_form, ScoreForm::Textbook);
    }
}
