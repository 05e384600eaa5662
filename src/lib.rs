//! # gmm-stream - Mergeable EM for Gaussian Mixtures
//!
//! Expectation-maximization for a Gaussian mixture model with one covariance
//! matrix shared by all clusters, expressed as partitionable aggregations.
//!
//! ## Overview
//!
//! Each EM iteration is split into independent pipelines. Every pipeline
//! folds rows into a partial state, merges partial states in any order and
//! finalizes them into the iteration's output:
//!
//! - **Responsibilities**: per-row cluster posteriors under the previous parameters
//! - **Weight/mean**: responsibility sums and responsibility-weighted point sums
//! - **Covariance**: responsibility-weighted outer products around the new means
//! - **Log-likelihood**: convergence monitoring under the updated parameters
//!
//! Because merging is associative and commutative, the same partial states can
//! be reduced over threads, processes or machines. [`PackedState`] flattens a
//! state to `f64`s for transport.
//!
//! ## Quick Start
//!
//! ```rust
//! use gmm_stream::prelude::*;
//!
//! let data = Dataset::from_vecs(vec![
//!     vec![0.0, 0.0],
//!     vec![0.0, 1.0],
//!     vec![10.0, 10.0],
//!     vec![10.0, 11.0],
//! ])
//! .unwrap();
//!
//! let initial = MixtureParams::from_vecs(
//!     vec![0.5, 0.5],
//!     &[vec![0.0, 0.5], vec![10.0, 10.5]],
//!     &[vec![1.0, 0.0], vec![0.0, 1.0]],
//! )
//! .unwrap();
//!
//! let driver = EmDriver::new(EmConfig::new().with_partitions(2)).unwrap();
//! let fit = driver.fit(&data, initial).unwrap();
//!
//! assert!((fit.params.weights[0] - 0.5).abs() < 1e-6);
//! assert!((fit.params.means[(1, 1)] - 10.5).abs() < 1e-6);
//! ```
//!
//! ## Driving The Pipelines Yourself
//!
//! ```rust
//! use gmm_stream::prelude::*;
//!
//! // Two workers fold their own rows...
//! let mut a = WeightMeanState::identity();
//! a.fold(WeightMeanRow::new(&[1.0, 2.0], &[1.0, 0.0])).unwrap();
//! let mut b = WeightMeanState::identity();
//! b.fold(WeightMeanRow::new(&[3.0, 4.0], &[0.0, 1.0])).unwrap();
//!
//! // ...ship one state across a process boundary...
//! let b = WeightMeanState::unpack(&b.pack()).unwrap();
//!
//! // ...and merge.
//! let update = a.combine(b).unwrap().finalize().unwrap();
//! assert_eq!(update.weights.as_slice(), &[0.5, 0.5]);
//! assert_eq!(update.means[(1, 0)], 3.0);
//! ```
//!
//! ## Numerical Failures
//!
//! Singular covariances, non-positive determinants, degenerate clusters and
//! underflowing responsibility scores surface as distinct [`ErrorCode`]s
//! tagged with the failing [`Pipeline`]. Nothing is retried internally.
//!
//! ## Module Overview
//!
//! - [`aggregate`]: the `Aggregate` trait and the three M-step/monitoring pipelines
//! - [`responsibility`]: the E-step
//! - [`em`]: reference driver over an in-memory dataset
//! - [`data_format`]: row storage with missing rows
//! - [`config`]: EM configuration
//! - [`utils`]: linear algebra, parallel reduction and synthetic data

// Allow some clippy lints that are not critical
#![allow(clippy::needless_range_loop)]
#![allow(clippy::module_inception)]

pub mod aggregate;
pub mod config;
pub mod data_format;
pub mod em;
pub mod error;
pub mod responsibility;
pub mod types;
pub mod utils;

pub use aggregate::{Aggregate, PackedState};
pub use config::{CovarianceWeights, EmConfig, ScoreForm};
pub use em::{EmDriver, EmHistory, FitResult, IterationOutcome};
pub use error::{ErrorCode, GmmError, Result};
pub use responsibility::{responsibilities, ResponsibilityEstimator};
pub use types::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aggregate::{
        combine_all, fold_rows, reduce_partitions, Aggregate, CovarianceRow, CovarianceState,
        CovarianceUpdate, LogLikelihood, LogLikelihoodRow, PackedState, WeightMeanRow,
        WeightMeanState, WeightMeanUpdate,
    };
    pub use crate::config::{CovarianceWeights, EmConfig, ScoreForm};
    pub use crate::data_format::Dataset;
    pub use crate::em::{EmDriver, EmHistory, FitResult, IterationOutcome};
    pub use crate::error::{ErrorCode, GmmError, PipelineExt, Result};
    pub use crate::responsibility::{responsibilities, ResponsibilityEstimator};
    pub use crate::types::*;

    // Utilities
    pub use crate::utils::{SharedCovariance, SyntheticMixture};
}
