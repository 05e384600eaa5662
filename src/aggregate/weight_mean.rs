//! Mixture weight and mean update.

use serde::{Deserialize, Serialize};

use super::Aggregate;
use crate::error::{GmmError, Result};
use crate::types::{Matrix, Pipeline, Vector};

/// One row of input: the data point and its responsibilities.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightMeanRow<'a> {
    /// Data point, length `d`.
    pub x: Option<&'a [f64]>,
    /// Responsibility vector, length `k`.
    pub z: Option<&'a [f64]>,
}

impl<'a> WeightMeanRow<'a> {
    /// A row with both inputs present.
    pub fn new(x: &'a [f64], z: &'a [f64]) -> Self {
        Self { x: Some(x), z: Some(z) }
    }
}

/// Partial sums of responsibilities and responsibility-weighted points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightMeanState {
    pub(crate) iteration: u32,
    pub(crate) width_of_x: usize,
    pub(crate) rows_seen: u64,
    /// Σ z_i per cluster.
    pub(crate) weight_sums: Vector,
    /// Σ z_i · x per cluster, one row per cluster.
    pub(crate) mean_sums: Matrix,
}

impl Default for WeightMeanState {
    fn default() -> Self {
        Self {
            iteration: 0,
            width_of_x: 0,
            rows_seen: 0,
            weight_sums: Vector::zeros(0),
            mean_sums: Matrix::zeros(0, 0),
        }
    }
}

impl WeightMeanState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Iteration counter.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Dimensionality, or 0 before the first row.
    pub fn width_of_x(&self) -> usize {
        self.width_of_x
    }

    /// Number of clusters, or 0 before the first row.
    pub fn num_clusters(&self) -> usize {
        self.weight_sums.len()
    }

    /// Rows folded into this state.
    pub fn rows_seen(&self) -> u64 {
        self.rows_seen
    }

    /// Running responsibility sums.
    pub fn weight_sums(&self) -> &Vector {
        &self.weight_sums
    }

    /// Running weighted point sums.
    pub fn mean_sums(&self) -> &Matrix {
        &self.mean_sums
    }

    fn initialize(&mut self, width_of_x: usize, num_clusters: usize) -> Result<()> {
        if width_of_x == 0 || num_clusters == 0 {
            return Err(GmmError::invalid_argument(format!(
                "cannot initialize from a row with {width_of_x} features and {num_clusters} responsibilities"
            )));
        }
        self.width_of_x = width_of_x;
        self.weight_sums = Vector::zeros(num_clusters);
        self.mean_sums = Matrix::zeros(num_clusters, width_of_x);
        Ok(())
    }
}

/// Updated mixture weights and means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightMeanUpdate {
    /// Mixture weights, summing to 1.
    pub weights: Vector,
    /// Cluster means, `k × d`.
    pub means: Matrix,
    /// Rows that contributed.
    pub rows_seen: u64,
}

impl Aggregate for WeightMeanState {
    type Row<'a> = WeightMeanRow<'a>;
    type Output = WeightMeanUpdate;

    const PIPELINE: Pipeline = Pipeline::WeightMean;

    fn identity() -> Self {
        Self::default()
    }

    fn is_identity(&self) -> bool {
        self.rows_seen == 0
    }

    fn fold(&mut self, row: WeightMeanRow<'_>) -> Result<()> {
        let (x, z) = match (row.x, row.z) {
            (Some(x), Some(z)) => (x, z),
            _ => return Ok(()),
        };

        if self.rows_seen == 0 {
            self.initialize(x.len(), z.len())?;
        } else if x.len() != self.width_of_x || z.len() != self.num_clusters() {
            return Err(GmmError::invalid_argument(format!(
                "row shape ({}, {}) does not match state shape ({}, {})",
                x.len(),
                z.len(),
                self.width_of_x,
                self.num_clusters()
            )));
        }

        self.rows_seen += 1;
        for (i, &zi) in z.iter().enumerate() {
            self.weight_sums[i] += zi;
            for (j, &xj) in x.iter().enumerate() {
                self.mean_sums[(i, j)] += zi * xj;
            }
        }
        Ok(())
    }

    fn combine(mut self, other: Self) -> Result<Self> {
        if self.rows_seen == 0 {
            return Ok(other);
        }
        if other.rows_seen == 0 {
            return Ok(self);
        }
        if self.width_of_x != other.width_of_x || self.num_clusters() != other.num_clusters() {
            return Err(GmmError::incompatible_state(format!(
                "cannot combine states of shape ({}, {}) and ({}, {})",
                self.width_of_x,
                self.num_clusters(),
                other.width_of_x,
                other.num_clusters()
            )));
        }

        self.rows_seen += other.rows_seen;
        self.weight_sums += &other.weight_sums;
        self.mean_sums += &other.mean_sums;
        Ok(self)
    }

    fn finalize(self) -> Result<WeightMeanUpdate> {
        if self.rows_seen == 0 {
            return Err(GmmError::empty_aggregate("no rows were folded"));
        }

        let mut means = self.mean_sums;
        for (i, &weight) in self.weight_sums.iter().enumerate() {
            if weight <= 0.0 || !weight.is_finite() {
                return Err(GmmError::degenerate_cluster(
                    i,
                    format!("degenerate cluster with total responsibility {weight}"),
                ));
            }
            for j in 0..self.width_of_x {
                means[(i, j)] /= weight;
            }
        }

        let weights = self.weight_sums / self.rows_seen as f64;

        Ok(WeightMeanUpdate {
            weights,
            means,
            rows_seen: self.rows_seen,
        })
    }
}
