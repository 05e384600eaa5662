//! Data format types for EM runs.
//!
//! This module provides the in-memory row store the reference driver
//! partitions and feeds into the aggregation pipelines.

mod dataset;

pub use dataset::Dataset;
