//! Mergeable aggregation of EM sufficient statistics.
//!
//! Every pipeline follows the same contract: start from an identity state,
//! fold rows into it, combine partial states pairwise in any order, then
//! finalize into the iteration's output. `combine` is associative and
//! commutative (up to floating-point summation order) and takes both inputs
//! by value, so a partial state is owned by exactly one partition at a time.

mod covariance;
mod log_likelihood;
mod packed;
mod weight_mean;

pub use covariance::{CovarianceRow, CovarianceState, CovarianceUpdate};
pub use log_likelihood::{LogLikelihood, LogLikelihoodRow};
pub use packed::PackedState;
pub use weight_mean::{WeightMeanRow, WeightMeanState, WeightMeanUpdate};

use crate::error::{PipelineExt, Result};
use crate::types::Pipeline;
use crate::utils::try_map_reduce;

/// A partitionable, mergeable aggregation.
pub trait Aggregate: Sized + Send {
    /// Per-row input. Any field may be missing, which makes the fold a no-op.
    type Row<'a>;

    /// Result of finalization.
    type Output;

    /// The pipeline this aggregate implements, used to tag errors.
    const PIPELINE: Pipeline;

    /// The neutral element for [`Aggregate::combine`].
    fn identity() -> Self;

    /// Whether this state has not folded any row yet.
    fn is_identity(&self) -> bool;

    /// Fold one row into the state.
    fn fold(&mut self, row: Self::Row<'_>) -> Result<()>;

    /// Combine two partial states.
    fn combine(self, other: Self) -> Result<Self>;

    /// Convert the accumulated state into the pipeline's output.
    fn finalize(self) -> Result<Self::Output>;
}

/// Fold a sequence of rows into a fresh state.
pub fn fold_rows<'a, A, I>(rows: I) -> Result<A>
where
    A: Aggregate,
    I: IntoIterator<Item = A::Row<'a>>,
{
    let mut state = A::identity();
    for row in rows {
        state.fold(row).in_pipeline(A::PIPELINE)?;
    }
    Ok(state)
}

/// Combine partial states left to right.
pub fn combine_all<A, I>(states: I) -> Result<A>
where
    A: Aggregate,
    I: IntoIterator<Item = A>,
{
    states
        .into_iter()
        .try_fold(A::identity(), |acc, s| acc.combine(s))
        .in_pipeline(A::PIPELINE)
}

/// Fold every partition independently, then combine the partial states.
///
/// With `parallel` set, partitions are folded on the rayon pool and merged in
/// a tree; otherwise they are folded and merged in order.
pub fn reduce_partitions<A, P, F>(partitions: &[P], parallel: bool, fold_partition: F) -> Result<A>
where
    A: Aggregate,
    P: Sync,
    F: Fn(&P) -> Result<A> + Sync + Send,
{
    try_map_reduce(
        partitions,
        parallel,
        |p| fold_partition(p).in_pipeline(A::PIPELINE),
        A::identity,
        |a: A, b: A| a.combine(b).in_pipeline(A::PIPELINE),
    )
}
