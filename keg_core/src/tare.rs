//! Tare capture: zero the display at the current load.

use crate::calibration::{CalibrationModel, DiscriminatorKey};
use crate::error::CalibrationError;
use crate::stats;

/// Tare offset for the current conditioned raw reading: the calibrated
/// value at `raw`, so the display reads zero there.
pub fn tare_offset(
    model: &CalibrationModel,
    raw: f64,
    key: Option<&DiscriminatorKey>,
    temp_c: Option<f64>,
) -> Result<f64, CalibrationError> {
    let value = model.calibrated(raw, key, temp_c).ok_or_else(|| {
        CalibrationError::UnknownKey(key.cloned().unwrap_or_default().to_string())
    })?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CalibrationError::NonFinite("tare offset"))
    }
}

/// Collects the first `need` committed raw values; the tare raw is their median.
#[derive(Debug, Clone)]
pub struct TareCapture {
    need: usize,
    samples: Vec<f64>,
}

impl TareCapture {
    pub fn new(need: usize) -> Self {
        Self {
            need: need.max(1),
            samples: Vec::with_capacity(need.max(1)),
        }
    }

    /// Record a committed raw value. Returns the median once enough were seen,
    /// and keeps returning it afterwards.
    pub fn offer(&mut self, committed_raw: f64) -> Option<f64> {
        if self.samples.len() < self.need {
            self.samples.push(committed_raw);
        }
        self.median()
    }

    pub fn median(&self) -> Option<f64> {
        if !self.is_complete() {
            return None;
        }
        let mut sorted = self.samples.clone();
        stats::median_in_place(&mut sorted)
    }

    pub fn is_complete(&self) -> bool {
        self.samples.len() >= self.need
    }

    pub fn collected(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::LinearFit;

    #[test]
    fn capture_median_after_need() {
        let mut t = TareCapture::new(3);
        assert_eq!(t.offer(100.0), None);
        assert_eq!(t.offer(300.0), None);
        assert_eq!(t.offer(200.0), Some(200.0));
        // later values do not move the tare
        assert_eq!(t.offer(900.0), Some(200.0));
        assert_eq!(t.collected(), 3);
    }

    #[test]
    fn offset_zeroes_display() {
        let model = CalibrationModel::single(LinearFit {
            slope: 0.001,
            intercept: 0.0,
        });
        let off = tare_offset(&model, 2000.0, None, None).unwrap();
        let tared = model.with_tare(off);
        assert!(tared.apply(2000.0, None, None).unwrap().abs() < 1e-12);
        assert!((tared.apply(7000.0, None, None).unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn offset_needs_a_fit() {
        let err = tare_offset(&CalibrationModel::default(), 1.0, None, None).unwrap_err();
        assert_eq!(err, CalibrationError::UnknownKey("default".into()));
    }
}
