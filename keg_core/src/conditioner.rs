//! Per-channel signal conditioning: Hampel outlier rejection, bounded
//! smoothing and a stability gate deciding when a reading may be committed.
//!
//! ```text
//! raw ──► Hampel window (k) ──accepted──► smoothing ring (n) ──► instantaneous
//!                │                                  │
//!             rejected                        full? sd/slope gate ──► committed
//! ```
//!
//! Every stage works over fixed-size windows with preallocated scratch, so
//! one `update` is O(window) and does not allocate.

use crate::error::KegError;
use crate::stats::{self, MAD_TO_SIGMA, Ring};

/// Smoothing statistic over the smoothing ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Smoothing {
    /// Robust to the asymmetric spikes seen on real hardware.
    #[default]
    Median,
    Mean,
}

/// Conditioning parameters. Thresholds are in raw counts, which are
/// sensor-specific, so deployments are expected to tune them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConditionerCfg {
    /// Hampel window capacity (k).
    pub outlier_window: usize,
    /// Rejection threshold in robust standard deviations.
    pub n_sigma: f64,
    /// Smoothing ring capacity.
    pub smooth_window: usize,
    pub smoothing: Smoothing,
    /// Commit only when the population stdev of the ring is below this.
    pub stable_sd: f64,
    /// Commit only when |last - first| / (len - 1) is below this.
    pub stable_slope: f64,
}

impl Default for ConditionerCfg {
    fn default() -> Self {
        Self {
            outlier_window: 7,
            n_sigma: 3.5,
            smooth_window: 5,
            smoothing: Smoothing::Median,
            stable_sd: 4.0,
            stable_slope: 1.5,
        }
    }
}

impl ConditionerCfg {
    pub fn validate(&self) -> Result<(), KegError> {
        if self.outlier_window < 3 {
            return Err(KegError::Config("outlier_window must be >= 3".into()));
        }
        if self.smooth_window < 2 {
            return Err(KegError::Config("smooth_window must be >= 2".into()));
        }
        if !(self.n_sigma.is_finite() && self.n_sigma > 0.0) {
            return Err(KegError::Config("n_sigma must be > 0".into()));
        }
        if !(self.stable_sd.is_finite() && self.stable_sd > 0.0) {
            return Err(KegError::Config("stable_sd must be > 0".into()));
        }
        if !(self.stable_slope.is_finite() && self.stable_slope > 0.0) {
            return Err(KegError::Config("stable_slope must be > 0".into()));
        }
        Ok(())
    }
}

/// Outcome of the outlier check for one raw value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Accepted,
    Rejected { median: f64, mad: f64 },
}

/// Median/MAD outlier rejector over a sliding window.
///
/// Rejected values still enter the window, so a sustained level shift
/// becomes the new normal after a few samples.
#[derive(Debug, Clone)]
pub struct HampelFilter {
    window: Ring,
    n_sigma: f64,
    vals: Vec<i64>,
    scratch: Vec<f64>,
}

impl HampelFilter {
    pub fn new(capacity: usize, n_sigma: f64) -> Self {
        let window = Ring::with_capacity(capacity);
        let cap = window.capacity();
        Self {
            window,
            n_sigma,
            vals: Vec::with_capacity(cap),
            scratch: Vec::with_capacity(cap),
        }
    }

    pub fn check(&mut self, raw: i64) -> Verdict {
        self.window.push(raw);
        if self.window.len() < 3 {
            return Verdict::Accepted;
        }
        self.vals.clear();
        self.vals.extend(self.window.iter());
        let Some((median, mad)) = stats::median_mad(&self.vals, &mut self.scratch) else {
            return Verdict::Accepted;
        };
        // A flat window has MAD 0; accept rather than reject every step change.
        if mad == 0.0 {
            return Verdict::Accepted;
        }
        if (raw as f64 - median).abs() > self.n_sigma * MAD_TO_SIGMA * mad {
            Verdict::Rejected { median, mad }
        } else {
            Verdict::Accepted
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}

/// Result of one `SignalConditioner::update`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConditionedSample {
    pub raw: i64,
    /// Smoothed value; `None` when the raw value was rejected.
    pub instantaneous: Option<f64>,
    /// Set when the gate judged the ring stable; the caller displays it.
    pub committed: Option<f64>,
    pub rejected: bool,
}

/// Stateful pipeline for one tracked quantity.
#[derive(Debug, Clone)]
pub struct SignalConditioner {
    cfg: ConditionerCfg,
    hampel: HampelFilter,
    smooth: Ring,
    scratch: Vec<f64>,
}

impl SignalConditioner {
    pub fn new(cfg: ConditionerCfg) -> Self {
        let hampel = HampelFilter::new(cfg.outlier_window, cfg.n_sigma);
        let smooth = Ring::with_capacity(cfg.smooth_window);
        let scratch = Vec::with_capacity(smooth.capacity());
        Self {
            cfg,
            hampel,
            smooth,
            scratch,
        }
    }

    pub fn cfg(&self) -> &ConditionerCfg {
        &self.cfg
    }

    pub fn update(&mut self, raw: i64) -> ConditionedSample {
        if let Verdict::Rejected { median, mad } = self.hampel.check(raw) {
            tracing::debug!(raw, median, mad, "outlier rejected");
            return ConditionedSample {
                raw,
                instantaneous: None,
                committed: None,
                rejected: true,
            };
        }

        self.smooth.push(raw);
        let instantaneous = self.smoothed();
        let committed = match instantaneous {
            Some(v) if self.is_stable() => Some(v),
            _ => None,
        };
        tracing::trace!(raw, ?instantaneous, ?committed, "conditioned");
        ConditionedSample {
            raw,
            instantaneous,
            committed,
            rejected: false,
        }
    }

    /// Current smoothed value without feeding a new sample.
    pub fn smoothed(&mut self) -> Option<f64> {
        let values = self.smooth.iter().map(|v| v as f64);
        match self.cfg.smoothing {
            Smoothing::Median => stats::median_with(values, &mut self.scratch),
            Smoothing::Mean => stats::mean(values),
        }
    }

    /// Stability gate. Never stable before the smoothing ring is full.
    fn is_stable(&mut self) -> bool {
        if !self.smooth.is_full() {
            return false;
        }
        let (Some(first), Some(last)) = (self.smooth.first(), self.smooth.last()) else {
            return false;
        };
        self.scratch.clear();
        self.scratch.extend(self.smooth.iter().map(|v| v as f64));
        let Some(sd) = stats::pstdev(&self.scratch) else {
            return false;
        };
        let slope = (last as f64 - first as f64) / (self.smooth.len() - 1) as f64;
        sd < self.cfg.stable_sd && slope.abs() < self.cfg.stable_slope
    }

    /// Whether the smoothing ring has filled (commits are possible).
    pub fn is_warm(&self) -> bool {
        self.smooth.is_full()
    }

    /// Clear both windows. Calibration is not affected.
    pub fn reset(&mut self) {
        self.hampel.reset();
        self.smooth.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond() -> SignalConditioner {
        SignalConditioner::new(ConditionerCfg::default())
    }

    #[test]
    fn first_samples_always_accepted() {
        let mut h = HampelFilter::new(7, 3.5);
        assert_eq!(h.check(10), Verdict::Accepted);
        assert_eq!(h.check(100_000), Verdict::Accepted);
    }

    #[test]
    fn spike_in_noisy_window_is_rejected() {
        let mut h = HampelFilter::new(7, 3.5);
        for v in [100, 102, 99, 101, 100, 98] {
            assert_eq!(h.check(v), Verdict::Accepted);
        }
        assert!(matches!(h.check(400), Verdict::Rejected { .. }));
        assert_eq!(h.check(101), Verdict::Accepted);
    }

    #[test]
    fn flat_window_accepts_step() {
        let mut h = HampelFilter::new(7, 3.5);
        for _ in 0..7 {
            h.check(100);
        }
        assert_eq!(h.check(900), Verdict::Accepted);
    }

    #[test]
    fn constant_input_commits_once_ring_full() {
        let mut c = cond();
        for i in 0..4 {
            let s = c.update(5000);
            assert_eq!(s.instantaneous, Some(5000.0), "sample {i}");
            assert_eq!(s.committed, None, "no commit before ring is full");
        }
        let s = c.update(5000);
        assert_eq!(s.committed, Some(5000.0));
        assert_eq!(s.committed, s.instantaneous);
    }

    #[test]
    fn ramp_never_commits() {
        let mut c = cond();
        for i in 0..100 {
            let s = c.update(1000 + i * 3);
            assert!(!s.rejected);
            assert_eq!(s.committed, None);
        }
    }

    #[test]
    fn full_range_swing_does_not_overflow() {
        let mut c = cond();
        for _ in 0..4 {
            c.update(i64::MIN);
        }
        let s = c.update(i64::MAX);
        assert!(!s.rejected, "flat window accepts the step");
        assert_eq!(s.committed, None);
        let s = c.update(i64::MIN);
        assert_eq!(s.committed, None);
    }

    #[test]
    fn noisy_but_flat_commits() {
        let mut c = cond();
        let mut last = None;
        for v in [500, 502, 499, 501, 500, 501, 499] {
            last = c.update(v).committed;
        }
        assert_eq!(last, Some(500.0));
    }

    #[test]
    fn rejected_sample_reports_filtered_and_keeps_ring() {
        let mut c = cond();
        for v in [500, 502, 499, 501, 500, 498] {
            c.update(v);
        }
        let s = c.update(5_000);
        assert!(s.rejected);
        assert_eq!(s.instantaneous, None);
        assert_eq!(s.committed, None);
        assert_eq!(c.smoothed(), Some(500.0));
    }

    #[test]
    fn mean_smoothing() {
        let mut c = SignalConditioner::new(ConditionerCfg {
            smoothing: Smoothing::Mean,
            smooth_window: 2,
            ..ConditionerCfg::default()
        });
        c.update(10);
        assert_eq!(c.update(13).instantaneous, Some(11.5));
    }

    #[test]
    fn reset_clears_windows() {
        let mut c = cond();
        for _ in 0..5 {
            c.update(7);
        }
        assert!(c.is_warm());
        c.reset();
        assert!(!c.is_warm());
        assert_eq!(c.smoothed(), None);
        assert_eq!(c.update(7).committed, None);
    }

    #[test]
    fn cfg_validation() {
        assert!(ConditionerCfg::default().validate().is_ok());
        let bad = ConditionerCfg {
            outlier_window: 2,
            ..ConditionerCfg::default()
        };
        assert!(bad.validate().is_err());
        let bad = ConditionerCfg {
            stable_slope: f64::NAN,
            ..ConditionerCfg::default()
        };
        assert!(bad.validate().is_err());
    }
}
