//! Error types for the EM aggregation pipelines.
//!
//! Every failure carries a code, the pipeline it came from (when known) and a
//! message. Missing-data rows are never errors; they are skipped by `fold`.

use std::fmt;
use thiserror::Error;

use crate::types::Pipeline;

/// Error codes for aggregation and numerical failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid argument provided (shape mismatch, bad configuration).
    InvalidArgument,
    /// Two partial states with different shapes were combined.
    IncompatibleState,
    /// The covariance matrix could not be inverted.
    SingularCovariance,
    /// The covariance determinant is zero or negative.
    NonPositiveDeterminant,
    /// A cluster received no responsibility mass.
    DegenerateCluster,
    /// Every responsibility score underflowed to zero.
    ScoreUnderflow,
    /// Finalize was called on a state that never saw a row.
    EmptyAggregate,
    /// Internal error.
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
            ErrorCode::IncompatibleState => write!(f, "INCOMPATIBLE_STATE"),
            ErrorCode::SingularCovariance => write!(f, "SINGULAR_COVARIANCE"),
            ErrorCode::NonPositiveDeterminant => write!(f, "NON_POSITIVE_DETERMINANT"),
            ErrorCode::DegenerateCluster => write!(f, "DEGENERATE_CLUSTER"),
            ErrorCode::ScoreUnderflow => write!(f, "SCORE_UNDERFLOW"),
            ErrorCode::EmptyAggregate => write!(f, "EMPTY_AGGREGATE"),
            ErrorCode::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// Main error type for GMM operations.
#[derive(Error, Debug, Clone)]
pub struct GmmError {
    code: ErrorCode,
    pipeline: Option<Pipeline>,
    message: String,
}

impl GmmError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            pipeline: None,
            message: message.into(),
        }
    }

    /// Attach the pipeline that raised this error.
    pub fn in_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the pipeline that failed, if recorded.
    pub fn pipeline(&self) -> Option<Pipeline> {
        self.pipeline
    }

    /// Get the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// True for the numerical failure family (as opposed to misuse).
    pub fn is_numerical(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::SingularCovariance
                | ErrorCode::NonPositiveDeterminant
                | ErrorCode::DegenerateCluster
                | ErrorCode::ScoreUnderflow
        )
    }

    // Convenience constructors

    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, msg)
    }

    /// Create an incompatible state error.
    pub fn incompatible_state(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::IncompatibleState, msg)
    }

    /// Create a singular covariance error.
    pub fn singular_covariance(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::SingularCovariance, msg)
    }

    /// Create a non-positive determinant error.
    pub fn non_positive_determinant(det: f64) -> Self {
        Self::new(
            ErrorCode::NonPositiveDeterminant,
            format!("covariance determinant {det} is not positive"),
        )
    }

    /// Create a degenerate cluster error for the given cluster index.
    pub fn degenerate_cluster(cluster: usize, msg: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::DegenerateCluster,
            format!("cluster {cluster}: {}", msg.into()),
        )
    }

    /// Create a score underflow error.
    pub fn score_underflow(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ScoreUnderflow, msg)
    }

    /// Create an empty aggregate error.
    pub fn empty_aggregate(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::EmptyAggregate, msg)
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, msg)
    }
}

impl fmt::Display for GmmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pipeline {
            Some(p) => write!(f, "{}: {}: {}", p, self.code, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

/// Result type alias for GMM operations.
pub type Result<T> = std::result::Result<T, GmmError>;

/// Extension trait tagging errors with the pipeline they came from.
pub trait PipelineExt<T> {
    /// Record `pipeline` on the error, keeping an existing tag.
    fn in_pipeline(self, pipeline: Pipeline) -> Result<T>;
}

impl<T> PipelineExt<T> for Result<T> {
    fn in_pipeline(self, pipeline: Pipeline) -> Result<T> {
        self.map_err(|e| {
            if e.pipeline.is_some() {
                e
            } else {
                e.in_pipeline(pipeline)
            }
        })
    }
}
