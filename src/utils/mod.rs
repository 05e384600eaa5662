//! Utility functions and types for the EM pipelines.

pub(crate) mod parallel;
pub mod linear_algebra;
pub mod random;

pub use parallel::{maybe_parallel_map_threshold, try_map_reduce, MIN_PARALLEL_SIZE};
pub use linear_algebra::{
    accumulate_outer, deviation, is_symmetric, matrix_to_vecs, regularize, vecs_to_matrix,
    SharedCovariance,
};
pub use random::SyntheticMixture;
