//! Parallel execution utilities.

use rayon::prelude::*;

/// Minimum number of rows before parallelization is beneficial.
/// Below this threshold, sequential execution is faster due to reduced overhead.
pub const MIN_PARALLEL_SIZE: usize = 1024;

/// Execute a map operation with a custom threshold.
#[inline]
pub fn maybe_parallel_map_threshold<T, U, F>(items: &[T], threshold: usize, f: F) -> Vec<U>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Sync + Send,
{
    if items.len() >= threshold {
        items.par_iter().map(&f).collect()
    } else {
        items.iter().map(f).collect()
    }
}

/// Map every item to a fallible partial result and combine them.
///
/// `combine` must be associative with `identity` as its neutral element; the
/// parallel path reduces in whatever tree shape rayon picks. `parallel`
/// selects between that path and a left-to-right chain.
pub fn try_map_reduce<T, A, E, M, I, C>(
    items: &[T],
    parallel: bool,
    map: M,
    identity: I,
    combine: C,
) -> Result<A, E>
where
    T: Sync,
    A: Send,
    E: Send,
    M: Fn(&T) -> Result<A, E> + Sync + Send,
    I: Fn() -> A + Sync + Send,
    C: Fn(A, A) -> Result<A, E> + Sync + Send,
{
    if parallel {
        items.par_iter().map(&map).try_reduce(&identity, &combine)
    } else {
        let mut acc = identity();
        for item in items {
            acc = combine(acc, map(item)?)?;
        }
        Ok(acc)
    }
}
