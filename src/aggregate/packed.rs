//! Flat `f64` encoding of partial states for cross-process transport.
//!
//! Layouts (matrices row-major):
//!
//! | State | Header | Payload |
//! |-------|--------|---------|
//! | `WeightMeanState` | iteration, d, k, rows | `k` weight sums, `k·d` mean sums |
//! | `CovarianceState` | iteration, d, k, rows | `d·d` covariance sum |
//! | `LogLikelihood` | rows | total |
//!
//! An identity state packs to its header alone.

use super::{CovarianceState, LogLikelihood, WeightMeanState};
use crate::error::{GmmError, Result};
use crate::types::{Matrix, Vector};

/// A state that can cross a process boundary as a flat array.
pub trait PackedState: Sized {
    /// Encode the state.
    fn pack(&self) -> Vec<f64>;

    /// Decode a state, validating the header against the buffer length.
    fn unpack(buf: &[f64]) -> Result<Self>;
}

const SHAPED_HEADER: usize = 4;

fn header_field(buf: &[f64], idx: usize, name: &str) -> Result<u64> {
    let v = *buf
        .get(idx)
        .ok_or_else(|| GmmError::invalid_argument(format!("packed state is missing {name}")))?;
    if !v.is_finite() || v < 0.0 || v.fract() != 0.0 || v > u64::MAX as f64 {
        return Err(GmmError::invalid_argument(format!(
            "packed {name} {v} is not a non-negative integer"
        )));
    }
    Ok(v as u64)
}

struct ShapedHeader {
    iteration: u32,
    width_of_x: usize,
    num_clusters: usize,
    rows_seen: u64,
}

fn read_shaped_header(buf: &[f64]) -> Result<ShapedHeader> {
    let iteration = header_field(buf, 0, "iteration")?;
    let iteration = u32::try_from(iteration)
        .map_err(|_| GmmError::invalid_argument("packed iteration overflows u32"))?;
    Ok(ShapedHeader {
        iteration,
        width_of_x: to_usize(header_field(buf, 1, "width")?, "width")?,
        num_clusters: to_usize(header_field(buf, 2, "cluster count")?, "cluster count")?,
        rows_seen: header_field(buf, 3, "row count")?,
    })
}

/// `SHAPED_HEADER + a + b * c`, rejecting sizes that overflow `usize`.
fn shaped_len(a: usize, b: usize, c: usize) -> Result<usize> {
    b.checked_mul(c)
        .and_then(|bc| bc.checked_add(a))
        .and_then(|n| n.checked_add(SHAPED_HEADER))
        .ok_or_else(|| GmmError::invalid_argument("packed header describes an impossible size"))
}

fn to_usize(v: u64, name: &str) -> Result<usize> {
    usize::try_from(v)
        .map_err(|_| GmmError::invalid_argument(format!("packed {name} {v} overflows usize")))
}

fn expect_len(buf: &[f64], expected: usize) -> Result<()> {
    if buf.len() != expected {
        return Err(GmmError::invalid_argument(format!(
            "packed state has {} values, expected {expected}",
            buf.len()
        )));
    }
    Ok(())
}

impl PackedState for WeightMeanState {
    fn pack(&self) -> Vec<f64> {
        let k = self.num_clusters();
        let d = self.width_of_x;
        let mut buf = Vec::with_capacity(SHAPED_HEADER + k + k * d);
        buf.extend_from_slice(&[
            self.iteration as f64,
            d as f64,
            k as f64,
            self.rows_seen as f64,
        ]);
        if self.rows_seen == 0 {
            return buf;
        }
        buf.extend(self.weight_sums.iter());
        for row in self.mean_sums.row_iter() {
            buf.extend(row.iter());
        }
        buf
    }

    fn unpack(buf: &[f64]) -> Result<Self> {
        let h = read_shaped_header(buf)?;
        if h.rows_seen == 0 {
            expect_len(buf, SHAPED_HEADER)?;
            return Ok(Self {
                iteration: h.iteration,
                ..Self::default()
            });
        }
        let (d, k) = (h.width_of_x, h.num_clusters);
        if d == 0 || k == 0 {
            return Err(GmmError::invalid_argument(
                "packed non-empty state has zero width or cluster count",
            ));
        }
        expect_len(buf, shaped_len(k, k, d)?)?;

        let payload = &buf[SHAPED_HEADER..];
        Ok(Self {
            iteration: h.iteration,
            width_of_x: d,
            rows_seen: h.rows_seen,
            weight_sums: Vector::from_column_slice(&payload[..k]),
            mean_sums: Matrix::from_row_slice(k, d, &payload[k..]),
        })
    }
}

impl PackedState for CovarianceState {
    fn pack(&self) -> Vec<f64> {
        let d = self.width_of_x;
        let mut buf = Vec::with_capacity(SHAPED_HEADER + d * d);
        buf.extend_from_slice(&[
            self.iteration as f64,
            d as f64,
            self.num_clusters as f64,
            self.rows_seen as f64,
        ]);
        if self.rows_seen == 0 {
            return buf;
        }
        for row in self.covar_sum.row_iter() {
            buf.extend(row.iter());
        }
        buf
    }

    fn unpack(buf: &[f64]) -> Result<Self> {
        let h = read_shaped_header(buf)?;
        if h.rows_seen == 0 {
            expect_len(buf, SHAPED_HEADER)?;
            return Ok(Self {
                iteration: h.iteration,
                ..Self::default()
            });
        }
        let (d, k) = (h.width_of_x, h.num_clusters);
        if d == 0 || k == 0 {
            return Err(GmmError::invalid_argument(
                "packed non-empty state has zero width or cluster count",
            ));
        }
        expect_len(buf, shaped_len(0, d, d)?)?;

        Ok(Self {
            iteration: h.iteration,
            width_of_x: d,
            num_clusters: k,
            rows_seen: h.rows_seen,
            covar_sum: Matrix::from_row_slice(d, d, &buf[SHAPED_HEADER..]),
        })
    }
}

impl PackedState for LogLikelihood {
    fn pack(&self) -> Vec<f64> {
        vec![self.rows_seen as f64, self.total]
    }

    fn unpack(buf: &[f64]) -> Result<Self> {
        expect_len(buf, 2)?;
        Ok(Self {
            rows_seen: header_field(buf, 0, "row count")?,
            total: buf[1],
        })
    }
}
