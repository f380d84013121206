//! Small robust-statistics helpers over bounded windows.
//!
//! All functions take a caller-owned scratch buffer so per-frame work does
//! not allocate once the scratch has grown to the window size.

use std::collections::VecDeque;

/// Scale factor turning a MAD into a standard-deviation estimate for
/// normally distributed data.
pub const MAD_TO_SIGMA: f64 = 1.4826;

/// Fixed-capacity FIFO of raw counts.
#[derive(Debug, Clone)]
pub struct Ring {
    buf: VecDeque<i64>,
    cap: usize,
}

impl Ring {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            buf: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Push a value, evicting the oldest one when full.
    pub fn push(&mut self, v: i64) -> Option<i64> {
        let evicted = if self.buf.len() == self.cap {
            self.buf.pop_front()
        } else {
            None
        };
        self.buf.push_back(v);
        evicted
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.buf.len() == self.cap
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn first(&self) -> Option<i64> {
        self.buf.front().copied()
    }

    pub fn last(&self) -> Option<i64> {
        self.buf.back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.buf.iter().copied()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Median of `values`. Even counts average the two middle values.
pub fn median_with(values: impl IntoIterator<Item = f64>, scratch: &mut Vec<f64>) -> Option<f64> {
    scratch.clear();
    scratch.extend(values);
    median_in_place(scratch)
}

/// Median of the slice, reordering it.
pub fn median_in_place(values: &mut [f64]) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    values.sort_unstable_by(f64::total_cmp);
    let mid = n / 2;
    if n.is_multiple_of(2) {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Median and median absolute deviation of `values`.
pub fn median_mad(values: &[i64], scratch: &mut Vec<f64>) -> Option<(f64, f64)> {
    let m = median_with(values.iter().map(|&v| v as f64), scratch)?;
    let mad = median_with(values.iter().map(|&v| (v as f64 - m).abs()), scratch)?;
    Some((m, mad))
}

pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values
        .into_iter()
        .fold((0.0f64, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Population standard deviation (divides by N).
pub fn pstdev(values: &[f64]) -> Option<f64> {
    let m = mean(values.iter().copied())?;
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}
