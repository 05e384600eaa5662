//! In-memory row store with optional (missing) rows.
//!
//! A missing row stands for a record whose feature vector is unavailable; the
//! pipelines skip it rather than failing the iteration.

use std::ops::Range;

use crate::error::{GmmError, Result};

/// A dense dataset where individual rows may be missing.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    rows: Vec<Option<Vec<f64>>>,
    dimensionality: usize,
    num_missing: usize,
}

impl Dataset {
    /// Create an empty dataset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dataset from complete rows.
    pub fn from_vecs(vecs: Vec<Vec<f64>>) -> Result<Self> {
        Self::from_optional(vecs.into_iter().map(Some).collect())
    }

    /// Create a dataset where `None` marks a missing row.
    pub fn from_optional(rows: Vec<Option<Vec<f64>>>) -> Result<Self> {
        let mut dataset = Self::new();
        for row in rows {
            match row {
                Some(values) => dataset.push(values)?,
                None => dataset.push_missing(),
            }
        }
        Ok(dataset)
    }

    /// Append a row.
    pub fn push(&mut self, values: Vec<f64>) -> Result<()> {
        if values.is_empty() {
            return Err(GmmError::invalid_argument("row has no features"));
        }
        if self.dimensionality == 0 {
            self.dimensionality = values.len();
        } else if values.len() != self.dimensionality {
            return Err(GmmError::invalid_argument(format!(
                "row dimensionality {} does not match dataset dimensionality {}",
                values.len(),
                self.dimensionality
            )));
        }
        self.rows.push(Some(values));
        Ok(())
    }

    /// Append a missing row.
    pub fn push_missing(&mut self) {
        self.rows.push(None);
        self.num_missing += 1;
    }

    /// Number of rows, missing ones included.
    pub fn size(&self) -> usize {
        self.rows.len()
    }

    /// Check if the dataset has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of missing rows.
    pub fn num_missing(&self) -> usize {
        self.num_missing
    }

    /// Features per row, or 0 if no complete row was added.
    pub fn dimensionality(&self) -> usize {
        self.dimensionality
    }

    /// Get a row; `None` if missing or out of bounds.
    pub fn get(&self, index: usize) -> Option<&[f64]> {
        self.rows.get(index).and_then(|r| r.as_deref())
    }

    /// All rows in order.
    pub fn rows(&self) -> &[Option<Vec<f64>>] {
        &self.rows
    }

    /// Split row indices into `n` contiguous ranges whose sizes differ by at
    /// most one. Never returns more ranges than rows, and always at least one.
    pub fn partition_ranges(&self, n: usize) -> Vec<Range<usize>> {
        let size = self.rows.len();
        let n = n.clamp(1, size.max(1));
        let base = size / n;
        let extra = size % n;

        let mut ranges = Vec::with_capacity(n);
        let mut start = 0;
        for i in 0..n {
            let len = base + usize::from(i < extra);
            ranges.push(start..start + len);
            start += len;
        }
        ranges
    }
}
