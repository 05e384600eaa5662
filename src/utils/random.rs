//! Synthetic mixture data for benchmarks, tests and the demo binary.

use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand_distr::Normal;

use crate::data_format::Dataset;
use crate::error::{GmmError, Result};
use crate::types::Matrix;

/// Isotropic Gaussian clusters sharing one standard deviation.
#[derive(Debug, Clone)]
pub struct SyntheticMixture {
    centers: Matrix,
    weights: Vec<f64>,
    std_dev: f64,
}

impl SyntheticMixture {
    /// Clusters centered at the rows of `centers`, equally likely.
    pub fn new(centers: Matrix, std_dev: f64) -> Result<Self> {
        if centers.nrows() == 0 || centers.ncols() == 0 {
            return Err(GmmError::invalid_argument("at least one non-empty center is required"));
        }
        if !std_dev.is_finite() || std_dev <= 0.0 {
            return Err(GmmError::invalid_argument(format!(
                "standard deviation must be positive, got {std_dev}"
            )));
        }
        let k = centers.nrows();
        Ok(Self {
            centers,
            weights: vec![1.0 / k as f64; k],
            std_dev,
        })
    }

    /// `k` clusters in `d` dimensions, center `i` at `i · separation` on every axis.
    pub fn spaced(k: usize, d: usize, separation: f64, std_dev: f64) -> Result<Self> {
        let centers = Matrix::from_fn(k, d, |i, _| i as f64 * separation);
        Self::new(centers, std_dev)
    }

    /// Set the cluster proportions (need not be normalized).
    pub fn with_weights(mut self, weights: Vec<f64>) -> Result<Self> {
        if weights.len() != self.centers.nrows() {
            return Err(GmmError::invalid_argument(format!(
                "{} weights for {} centers",
                weights.len(),
                self.centers.nrows()
            )));
        }
        self.weights = weights;
        Ok(self)
    }

    /// The cluster centers, one per row.
    pub fn centers(&self) -> &Matrix {
        &self.centers
    }

    /// The per-axis standard deviation.
    pub fn std_dev(&self) -> f64 {
        self.std_dev
    }

    /// Draw `n` points.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Vec<Vec<f64>>> {
        let chooser = WeightedIndex::new(&self.weights)
            .map_err(|e| GmmError::invalid_argument(format!("bad cluster weights: {e}")))?;
        let noise = Normal::new(0.0, self.std_dev)
            .map_err(|e| GmmError::invalid_argument(format!("bad standard deviation: {e}")))?;

        Ok((0..n)
            .map(|_| {
                let c = chooser.sample(rng);
                self.centers
                    .row(c)
                    .iter()
                    .map(|&m| m + noise.sample(rng))
                    .collect()
            })
            .collect())
    }

    /// Draw `n` points into a dataset using a seeded generator.
    pub fn sample_dataset(&self, n: usize, seed: u64) -> Result<Dataset> {
        let mut rng = StdRng::seed_from_u64(seed);
        Dataset::from_vecs(self.sample(n, &mut rng)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spaced_centers() {
        let mix = SyntheticMixture::spaced(3, 2, 5.0, 1.0).unwrap();
        assert_eq!(mix.centers()[(2, 1)], 10.0);
        assert_eq!(mix.centers()[(0, 0)], 0.0);
    }

    #[test]
    fn test_sampling_is_seeded() {
        let mix = SyntheticMixture::spaced(2, 3, 8.0, 0.5).unwrap();
        let a = mix.sample_dataset(50, 7).unwrap();
        let b = mix.sample_dataset(50, 7).unwrap();
        assert_eq!(a.size(), 50);
        assert_eq!(a.dimensionality(), 3);
        assert_eq!(a.rows(), b.rows());
    }

    #[test]
    fn test_weights_select_clusters() {
        let mix = SyntheticMixture::spaced(2, 1, 100.0, 0.1)
            .unwrap()
            .with_weights(vec![0.0, 1.0])
            .unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let points = mix.sample(20, &mut rng).unwrap();
        assert!(points.iter().all(|p| p[0] > 50.0));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(SyntheticMixture::spaced(0, 2, 1.0, 1.0).is_err());
        assert!(SyntheticMixture::spaced(2, 2, 1.0, 0.0).is_err());
        assert!(SyntheticMixture::spaced(2, 2, 1.0, 1.0)
            .unwrap()
            .with_weights(vec![1.0])
            .is_err());
    }
}
