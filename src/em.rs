//! Reference EM driver over an in-memory, partitioned dataset.
//!
//! One iteration:
//!
//! 1. Responsibilities for every row under the previous parameters.
//! 2. Weight/mean pipeline over all partitions.
//! 3. Covariance pipeline with the fresh means (and previous or fresh
//!    weights, see [`CovarianceWeights`]), plus the configured ridge.
//! 4. Log-likelihood pipeline under the updated parameters.
//!
//! Each pipeline folds partitions independently and merges the partial states,
//! on the rayon pool once the dataset reaches `min_parallel_rows`.

use std::ops::Range;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregate::{
    reduce_partitions, Aggregate, CovarianceRow, CovarianceState, LogLikelihood,
    LogLikelihoodRow, WeightMeanRow, WeightMeanState,
};
use crate::config::{CovarianceWeights, EmConfig};
use crate::data_format::Dataset;
use crate::error::{GmmError, PipelineExt, Result};
use crate::responsibility::ResponsibilityEstimator;
use crate::types::{MixtureParams, Pipeline, Vector};
use crate::utils::{maybe_parallel_map_threshold, regularize, SharedCovariance};

/// Result of one EM iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationOutcome {
    /// Updated parameters.
    pub params: MixtureParams,
    /// Log-likelihood under the updated parameters.
    pub log_likelihood: f64,
    /// Rows that contributed (missing rows excluded).
    pub rows_used: u64,
}

/// Log-likelihood trace of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmHistory {
    /// One value per completed iteration.
    pub log_likelihoods: Vec<f64>,
    /// Whether the tolerance was reached.
    pub converged: bool,
}

impl EmHistory {
    /// Number of completed iterations.
    pub fn iterations(&self) -> usize {
        self.log_likelihoods.len()
    }

    /// Whether the log-likelihood never dropped by more than `tol` (relative).
    pub fn is_non_decreasing(&self, tol: f64) -> bool {
        self.log_likelihoods.windows(2).all(|w| {
            let scale = w[0].abs().max(w[1].abs()).max(1.0);
            w[1] >= w[0] - tol * scale
        })
    }
}

/// Result of a full fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Final parameters.
    pub params: MixtureParams,
    /// Log-likelihood trace.
    pub history: EmHistory,
}

/// Drives the aggregation pipelines through EM iterations.
#[derive(Debug, Clone)]
pub struct EmDriver {
    config: EmConfig,
}

impl EmDriver {
    /// Create a driver, validating the configuration.
    pub fn new(config: EmConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The driver's configuration.
    pub fn config(&self) -> &EmConfig {
        &self.config
    }

    /// Run a single EM iteration starting from `params`.
    pub fn run_iteration(&self, data: &Dataset, params: &MixtureParams) -> Result<IterationOutcome> {
        params.validate()?;
        if data.dimensionality() != 0 && data.dimensionality() != params.dimensionality() {
            return Err(GmmError::invalid_argument(format!(
                "dataset has {} features but the means have {}",
                data.dimensionality(),
                params.dimensionality()
            )));
        }

        let parallel = data.size() >= self.config.min_parallel_rows;
        let partitions = data.partition_ranges(self.config.num_partitions);
        let rows = data.rows();

        // E-step
        let estimator = ResponsibilityEstimator::new(params)?
            .with_score_form(self.config.score_form)
            .with_log_domain(self.config.log_domain_scores);
        let threshold = if parallel { 0 } else { usize::MAX };
        let resp: Vec<Option<Vector>> =
            maybe_parallel_map_threshold(rows, threshold, |row| {
                row.as_deref().map(|x| estimator.estimate(x)).transpose()
            })
            .into_iter()
            .collect::<Result<_>>()?;

        let x_at = |i: usize| rows[i].as_deref();
        let z_at = |i: usize| resp[i].as_ref().map(|z| z.as_slice());

        // Weight/mean
        let weight_mean: WeightMeanState =
            reduce_partitions(&partitions, parallel, |range: &Range<usize>| {
                let mut state = WeightMeanState::identity();
                for i in range.clone() {
                    state.fold(WeightMeanRow { x: x_at(i), z: z_at(i) })?;
                }
                debug!(rows = state.rows_seen(), start = range.start, "weight/mean partition folded");
                Ok(state)
            })?;
        let update = weight_mean.finalize().in_pipeline(Pipeline::WeightMean)?;

        // Covariance
        let cov_weights = match self.config.covariance_weights {
            CovarianceWeights::Previous => &params.weights,
            CovarianceWeights::Current => &update.weights,
        };
        let covariance: CovarianceState =
            reduce_partitions(&partitions, parallel, |range: &Range<usize>| {
                let mut state = CovarianceState::identity();
                for i in range.clone() {
                    state.fold(CovarianceRow {
                        x: x_at(i),
                        z: z_at(i),
                        weights: Some(cov_weights.as_slice()),
                        means: Some(&update.means),
                    })?;
                }
                debug!(rows = state.rows_seen(), start = range.start, "covariance partition folded");
                Ok(state)
            })?;
        let mut cov_update = covariance.finalize().in_pipeline(Pipeline::Covariance)?;
        regularize(&mut cov_update.covariance, self.config.reg_covar);

        let next = MixtureParams {
            weights: update.weights,
            means: update.means,
            covariance: cov_update.covariance,
        };

        // Log-likelihood
        let shared =
            SharedCovariance::new(next.covariance.clone()).in_pipeline(Pipeline::LogLikelihood)?;
        let ll: LogLikelihood = reduce_partitions(&partitions, parallel, |range: &Range<usize>| {
            let mut acc = LogLikelihood::identity();
            for i in range.clone() {
                acc.fold(LogLikelihoodRow {
                    x: x_at(i),
                    z: z_at(i),
                    weights: Some(next.weights.as_slice()),
                    means: Some(&next.means),
                    covariance: Some(&shared),
                })?;
            }
            Ok(acc)
        })?;
        let log_likelihood = ll.finalize().in_pipeline(Pipeline::LogLikelihood)?;

        Ok(IterationOutcome {
            params: next,
            log_likelihood,
            rows_used: update.rows_seen,
        })
    }

    /// Iterate from `initial` until the log-likelihood change drops below the
    /// tolerance or `max_iterations` is reached.
    pub fn fit(&self, data: &Dataset, initial: MixtureParams) -> Result<FitResult> {
        let mut params = initial;
        let mut history = EmHistory::default();
        let start = Instant::now();

        for iteration in 0..self.config.max_iterations {
            let outcome = self.run_iteration(data, &params).map_err(|e| {
                warn!(iteration, error = %e, "EM iteration failed");
                e
            })?;

            let ll = outcome.log_likelihood;
            let delta = history.log_likelihoods.last().map(|prev| ll - prev);
            info!(
                iteration,
                log_likelihood = ll,
                delta = delta.unwrap_or(f64::NAN),
                rows = outcome.rows_used,
                "EM iteration complete"
            );

            history.log_likelihoods.push(ll);
            params = outcome.params;

            if let Some(delta) = delta {
                if delta.abs() < self.config.tolerance {
                    history.converged = true;
                    break;
                }
            }
        }

        info!(
            iterations = history.iterations(),
            converged = history.converged,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "EM fit finished"
        );

        Ok(FitResult { params, history })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn four_points() -> Dataset {
        Dataset::from_vecs(vec![
            vec![0.0, 0.0],
            vec![0.0, 1.0],
            vec![10.0, 10.0],
            vec![10.0, 11.0],
        ])
        .unwrap()
    }

    fn initial() -> MixtureParams {
        MixtureParams::from_vecs(
            vec![0.5, 0.5],
            &[vec![0.0, 0.5], vec![10.0, 10.5]],
            &[vec![1.0, 0.0], vec![0.0, 1.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_single_iteration() {
        let driver = EmDriver::new(EmConfig::default()).unwrap();
        let outcome = driver.run_iteration(&four_points(), &initial()).unwrap();
        let p = &outcome.params;
        assert_eq!(outcome.rows_used, 4);
        assert!((p.weights.sum() - 1.0).abs() < 1e-9);
        assert!((p.means[(0, 1)] - 0.5).abs() < 1e-6);
        assert!((p.means[(1, 0)] - 10.0).abs() < 1e-6);
        assert!((p.covariance[(1, 1)] - 0.25).abs() < 1e-3);
        assert!(outcome.log_likelihood.is_finite());
    }

    #[test]
    fn test_covariance_weight_choice() {
        // Unbalanced starting weights; the data splits evenly, so the
        // updated weights are 0.5 / 0.5.
        let start = MixtureParams::from_vecs(
            vec![0.25, 0.75],
            &[vec![0.0, 0.5], vec![10.0, 10.5]],
            &[vec![1.0, 0.0], vec![0.0, 1.0]],
        )
        .unwrap();
        let run = |weights| {
            EmDriver::new(EmConfig::new().with_covariance_weights(weights))
                .unwrap()
                .run_iteration(&four_points(), &start)
                .unwrap()
        };
        let current = run(CovarianceWeights::Current);
        let previous = run(CovarianceWeights::Previous);

        assert!((current.params.weights[0] - 0.5).abs() < 1e-9);
        assert!((current.params.weights[1] - 0.5).abs() < 1e-9);

        // Every row deviates by 0.5 along y from its own mean. With the updated
        // weights each contributes 0.25 / 0.5, over 4 rows × 2 clusters.
        let expected_current = 4.0 * (0.25 / 0.5) / 8.0 + 1e-6;
        assert!((current.params.covariance[(1, 1)] - expected_current).abs() < 1e-6);

        // With the starting weights: two rows at 0.25 / 0.25, two at 0.25 / 0.75.
        let expected_previous = (2.0 * (0.25 / 0.25) + 2.0 * (0.25 / 0.75)) / 8.0 + 1e-6;
        assert!((previous.params.covariance[(1, 1)] - expected_previous).abs() < 1e-6);

        let gap = current.params.covariance[(1, 1)] - previous.params.covariance[(1, 1)];
        assert!(gap.abs() > 0.05);
        assert!((current.params.means - previous.params.means).norm() < 1e-12);
    }

    #[test]
    fn test_missing_rows_do_not_count() {
        let data = Dataset::from_optional(vec![
            Some(vec![0.0, 0.0]),
            None,
            Some(vec![0.0, 1.0]),
            Some(vec![10.0, 10.0]),
            None,
            Some(vec![10.0, 11.0]),
        ])
        .unwrap();
        let driver = EmDriver::new(EmConfig::new().with_partitions(3)).unwrap();
        let with_missing = driver.run_iteration(&data, &initial()).unwrap();
        let complete = driver.run_iteration(&four_points(), &initial()).unwrap();
        assert_eq!(with_missing.rows_used, 4);
        assert!((with_missing.params.means - complete.params.means).norm() < 1e-12);
        assert!((with_missing.log_likelihood - complete.log_likelihood).abs() < 1e-9);
    }

    #[test]
    fn test_zero_ridge_collapses_to_singular() {
        // No spread along x at all.
        let data = Dataset::from_vecs(vec![
            vec![0.0, 0.0],
            vec![0.0, 1.0],
            vec![0.0, 2.0],
            vec![0.0, 3.0],
        ])
        .unwrap();
        let start =
            MixtureParams::from_vecs(vec![1.0], &[vec![0.0, 1.0]], &[vec![1.0, 0.0], vec![0.0, 1.0]])
                .unwrap();

        let driver = EmDriver::new(EmConfig::new().with_reg_covar(0.0)).unwrap();
        let err = driver.run_iteration(&data, &start).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SingularCovariance);
        assert_eq!(err.pipeline(), Some(Pipeline::LogLikelihood));

        let driver = EmDriver::new(EmConfig::default()).unwrap();
        assert!(driver.run_iteration(&data, &start).is_ok());
    }

    #[test]
    fn test_dimension_mismatch() {
        let data = Dataset::from_vecs(vec![vec![1.0, 2.0, 3.0]]).unwrap();
        let driver = EmDriver::new(EmConfig::default()).unwrap();
        let err = driver.run_iteration(&data, &initial()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_empty_dataset() {
        let driver = EmDriver::new(EmConfig::default()).unwrap();
        let err = driver.run_iteration(&Dataset::new(), &initial()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::EmptyAggregate);
        assert_eq!(err.pipeline(), Some(Pipeline::WeightMean));
    }

    #[test]
    fn test_history_monotonicity_check() {
        let h = EmHistory {
            log_likelihoods: vec![-10.0, -5.0, -5.0, -4.0],
            converged: false,
        };
        assert!(h.is_non_decreasing(0.0));
        let h = EmHistory {
            log_likelihoods: vec![-10.0, -11.0],
            converged: false,
        };
        assert!(!h.is_non_decreasing(1e-9));
    }
}
