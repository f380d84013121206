//! Raw counts to physical units.
//!
//! value = slope * raw + intercept, chosen per discriminator key, then
//! optional temperature compensation and tare:
//!
//! ```text
//! v  = slope[key] * raw + intercept[key]
//! v -= temp_coeff * (temp_c - temp_ref)      (when both are set and temp_c is known)
//! v  = max(0, v - tare_offset)               (floor only for non-negative quantities)
//! ```
//!
//! Models are values: every modifier returns a new model, and the live
//! pipeline swaps whole models (see `shared::SharedCalibration`).

use std::collections::BTreeMap;
use std::fmt;

use crate::error::CalibrationError;

/// Selects which fit applies to a frame.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DiscriminatorKey(String);

impl DiscriminatorKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == keg_config::DEFAULT_KEY
    }
}

impl Default for DiscriminatorKey {
    fn default() -> Self {
        Self(keg_config::DEFAULT_KEY.to_string())
    }
}

impl From<i64> for DiscriminatorKey {
    fn from(v: i64) -> Self {
        Self(v.to_string())
    }
}

impl From<&str> for DiscriminatorKey {
    fn from(v: &str) -> Self {
        Self(v.to_string())
    }
}

impl fmt::Display for DiscriminatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One linear fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    #[inline]
    pub fn apply(&self, raw: f64) -> f64 {
        self.slope * raw + self.intercept
    }
}

/// Fit through (raw_empty, 0) and (raw_loaded, known_value).
///
/// The zero denominator is checked before dividing, so the result is never
/// `inf`/`NaN` for finite inputs.
pub fn fit_two_point(
    raw_empty: f64,
    raw_loaded: f64,
    known_value: f64,
) -> Result<LinearFit, CalibrationError> {
    if !(raw_empty.is_finite() && raw_loaded.is_finite() && known_value.is_finite()) {
        return Err(CalibrationError::NonFinite("capture input"));
    }
    let delta = raw_loaded - raw_empty;
    if delta == 0.0 {
        return Err(CalibrationError::DegenerateCalibration { raw: raw_empty });
    }
    let slope = known_value / delta;
    let intercept = -slope * raw_empty;
    if !(slope.is_finite() && intercept.is_finite()) {
        return Err(CalibrationError::NonFinite("slope/intercept"));
    }
    Ok(LinearFit { slope, intercept })
}

/// Least-squares fit over (raw, value) points with one robust refit.
///
/// Raw values must be strictly monotonic (increasing or decreasing) with no
/// duplicates. After the initial OLS fit, points with |residual| > 2 * RMS
/// are dropped and the line is refit when at least two points remain.
pub fn fit_least_squares(points: &[(f64, f64)]) -> Result<LinearFit, CalibrationError> {
    if points.len() < 2 {
        return Err(CalibrationError::InvalidRows(format!(
            "need at least two points, got {}",
            points.len()
        )));
    }
    if points
        .iter()
        .any(|(x, y)| !(x.is_finite() && y.is_finite()))
    {
        return Err(CalibrationError::NonFinite("calibration point"));
    }

    let mut dir = 0i8;
    for i in 1..points.len() {
        let d = points[i].0 - points[i - 1].0;
        if d == 0.0 {
            return Err(CalibrationError::InvalidRows(format!(
                "duplicate raw values at index {} and {}",
                i - 1,
                i
            )));
        }
        let step_dir = if d > 0.0 { 1 } else { -1 };
        if dir == 0 {
            dir = step_dir;
        } else if dir != step_dir {
            return Err(CalibrationError::InvalidRows(
                "raw values must be monotonic (strictly increasing or strictly decreasing)".into(),
            ));
        }
    }

    let (a0, b0) = ols(points).ok_or(CalibrationError::DegenerateCalibration {
        raw: points[0].0,
    })?;

    let sumsq: f64 = points
        .iter()
        .map(|(x, y)| {
            let r = y - (a0 * x + b0);
            r * r
        })
        .sum();
    let rms = (sumsq / points.len() as f64).sqrt();
    let (slope, intercept) = robust_refit(points, a0, b0, rms, 2.0).unwrap_or((a0, b0));
    if slope == 0.0 {
        return Err(CalibrationError::InvalidRows(
            "fit has zero slope (value does not change with raw)".into(),
        ));
    }
    Ok(LinearFit { slope, intercept })
}

fn ols(pts: &[(f64, f64)]) -> Option<(f64, f64)> {
    let n = pts.len() as f64;
    let mean_x = pts.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pts.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxx, mut sxy) = (0.0f64, 0.0f64);
    for (x, y) in pts {
        let dx = x - mean_x;
        sxx += dx * dx;
        sxy += dx * (y - mean_y);
    }
    if !sxx.is_finite() || sxx == 0.0 {
        return None;
    }
    let a = sxy / sxx;
    a.is_finite().then(|| (a, mean_y - a * mean_x))
}

/// Refit on inliers (|residual| <= k * rms) using an online covariance
/// update. `None` when nothing was rejected or too few inliers remain.
fn robust_refit(pts: &[(f64, f64)], a0: f64, b0: f64, rms: f64, k: f64) -> Option<(f64, f64)> {
    if !(rms.is_finite() && rms > 0.0) {
        return None;
    }
    let thr = k * rms;
    let mut n_in = 0usize;
    let (mut mean_x, mut mean_y, mut cxx, mut cxy) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
    for &(x, y) in pts {
        if (y - (a0 * x + b0)).abs() > thr {
            continue;
        }
        n_in += 1;
        let n = n_in as f64;
        let dx = x - mean_x;
        let dy = y - mean_y;
        mean_x += dx / n;
        mean_y += dy / n;
        cxx += dx * (x - mean_x);
        cxy += dx * (y - mean_y);
    }
    if n_in < 2 || n_in == pts.len() || !cxx.is_finite() || cxx == 0.0 {
        return None;
    }
    let a = cxy / cxx;
    (a.is_finite() && a != 0.0).then(|| (a, mean_y - a * mean_x))
}

/// Fit every discriminator key found in calibration rows.
///
/// Rows are grouped by key (missing key = default key) and each group is
/// fitted by least squares in file order.
pub fn fit_rows(
    rows: &[keg_config::CalibrationRow],
) -> Result<Vec<(DiscriminatorKey, LinearFit)>, CalibrationError> {
    let mut groups: BTreeMap<DiscriminatorKey, Vec<(f64, f64)>> = BTreeMap::new();
    for r in rows {
        let key = r
            .key
            .as_deref()
            .map_or_else(DiscriminatorKey::default, DiscriminatorKey::from);
        groups.entry(key).or_default().push((r.raw as f64, r.value));
    }
    groups
        .into_iter()
        .map(|(k, pts)| {
            fit_least_squares(&pts)
                .map(|fit| (k.clone(), fit))
                .map_err(|e| match e {
                    CalibrationError::InvalidRows(msg) => {
                        CalibrationError::InvalidRows(format!("key '{k}': {msg}"))
                    }
                    other => other,
                })
        })
        .collect()
}

/// Per-key linear fits plus optional temperature compensation and tare.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationModel {
    points: BTreeMap<DiscriminatorKey, LinearFit>,
    pub temp_ref: Option<f64>,
    pub temp_coeff: Option<f64>,
    pub tare_offset: Option<f64>,
    /// Floor tared values at zero. Right for weight; wrong for signed quantities.
    pub non_negative: bool,
}

impl Default for CalibrationModel {
    fn default() -> Self {
        Self {
            points: BTreeMap::new(),
            temp_ref: None,
            temp_coeff: None,
            tare_offset: None,
            non_negative: true,
        }
    }
}

impl CalibrationModel {
    /// Model with a single fit under the default key.
    pub fn single(fit: LinearFit) -> Self {
        Self::default().with_fit(DiscriminatorKey::default(), fit)
    }

    /// Copy of this model with `fit` installed for `key`; other keys are kept.
    pub fn with_fit(mut self, key: DiscriminatorKey, fit: LinearFit) -> Self {
        self.points.insert(key, fit);
        self
    }

    pub fn with_temp_compensation(mut self, temp_ref: f64, temp_coeff: f64) -> Self {
        self.temp_ref = Some(temp_ref);
        self.temp_coeff = Some(temp_coeff);
        self
    }

    pub fn with_tare(mut self, offset: f64) -> Self {
        self.tare_offset = Some(offset);
        self
    }

    pub fn without_tare(mut self) -> Self {
        self.tare_offset = None;
        self
    }

    pub fn non_negative(mut self, on: bool) -> Self {
        self.non_negative = on;
        self
    }

    pub fn fit_for(&self, key: Option<&DiscriminatorKey>) -> Option<&LinearFit> {
        match key {
            Some(k) => self.points.get(k),
            None => self.points.get(&DiscriminatorKey::default()),
        }
    }

    pub fn fits(&self) -> impl Iterator<Item = (&DiscriminatorKey, &LinearFit)> {
        self.points.iter()
    }

    pub fn is_calibrated(&self) -> bool {
        !self.points.is_empty()
    }

    /// Calibrated and temperature-compensated value, before tare.
    pub fn calibrated(
        &self,
        raw: f64,
        key: Option<&DiscriminatorKey>,
        temp_c: Option<f64>,
    ) -> Option<f64> {
        let fit = self.fit_for(key)?;
        let mut value = fit.apply(raw);
        if let (Some(temp_ref), Some(coeff), Some(t)) = (self.temp_ref, self.temp_coeff, temp_c) {
            value -= coeff * (t - temp_ref);
        }
        Some(value)
    }

    /// Physical value for `raw`, or `None` when `key` has no fit (uncalibrated).
    pub fn apply(
        &self,
        raw: f64,
        key: Option<&DiscriminatorKey>,
        temp_c: Option<f64>,
    ) -> Option<f64> {
        self.apply_tare(raw, key, temp_c, self.tare_offset)
    }

    /// `apply` with `tare` in place of the installed offset.
    pub fn apply_tare(
        &self,
        raw: f64,
        key: Option<&DiscriminatorKey>,
        temp_c: Option<f64>,
        tare: Option<f64>,
    ) -> Option<f64> {
        let value = self.calibrated(raw, key, temp_c)?;
        Some(match tare {
            Some(tare) if self.non_negative => (value - tare).max(0.0),
            Some(tare) => value - tare,
            None => value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn two_point_exact_at_both_captures() {
        let fit = fit_two_point(1000.0, 500.0, 2.0).unwrap();
        assert!(close(fit.slope, -0.004));
        assert!(close(fit.intercept, 4.0));
        let m = CalibrationModel::single(fit);
        assert!(close(m.apply(1000.0, None, None).unwrap(), 0.0));
        assert!(close(m.apply(500.0, None, None).unwrap(), 2.0));
    }

    #[test]
    fn two_point_degenerate_is_error() {
        let err = fit_two_point(1000.0, 1000.0, 2.0).unwrap_err();
        assert_eq!(err, CalibrationError::DegenerateCalibration { raw: 1000.0 });
        assert!(matches!(
            fit_two_point(f64::NAN, 1.0, 2.0),
            Err(CalibrationError::NonFinite(_))
        ));
    }

    #[test]
    fn missing_key_is_uncalibrated_not_zero() {
        let m = CalibrationModel::default().with_fit(
            DiscriminatorKey::from(3_i64),
            LinearFit {
                slope: 1.0,
                intercept: 0.0,
            },
        );
        assert_eq!(m.apply(10.0, Some(&DiscriminatorKey::from(4_i64)), None), None);
        assert_eq!(m.apply(10.0, None, None), None);
        assert_eq!(m.apply(10.0, Some(&DiscriminatorKey::from(3_i64)), None), Some(10.0));
    }

    #[test]
    fn with_fit_keeps_other_keys() {
        let a = DiscriminatorKey::from("a");
        let b = DiscriminatorKey::from("b");
        let fit_b = LinearFit {
            slope: 2.0,
            intercept: 1.0,
        };
        let m = CalibrationModel::default()
            .with_fit(b.clone(), fit_b)
            .with_fit(
                a.clone(),
                LinearFit {
                    slope: 9.0,
                    intercept: 0.0,
                },
            );
        assert_eq!(m.fit_for(Some(&b)), Some(&fit_b));
        assert_eq!(m.fits().count(), 2);
    }

    #[test]
    fn temperature_compensation_only_with_all_inputs() {
        let m = CalibrationModel::single(LinearFit {
            slope: 1.0,
            intercept: 0.0,
        })
        .with_temp_compensation(20.0, 0.5);
        assert!(close(m.apply(10.0, None, Some(24.0)).unwrap(), 8.0));
        assert!(close(m.apply(10.0, None, None).unwrap(), 10.0));
    }

    #[test]
    fn tare_floors_only_non_negative() {
        let fit = LinearFit {
            slope: 1.0,
            intercept: 0.0,
        };
        let m = CalibrationModel::single(fit).with_tare(5.0);
        assert!(close(m.apply(7.0, None, None).unwrap(), 2.0));
        assert!(close(m.apply(3.0, None, None).unwrap(), 0.0));
        let signed = m.clone().non_negative(false);
        assert!(close(signed.apply(3.0, None, None).unwrap(), -2.0));
        assert!(close(m.apply_tare(7.0, None, None, Some(1.0)).unwrap(), 6.0));
        assert!(close(m.apply_tare(0.5, None, None, Some(1.0)).unwrap(), 0.0));
        assert!(close(m.without_tare().apply(3.0, None, None).unwrap(), 3.0));
    }

    #[test]
    fn least_squares_exact_line() {
        let fit = fit_least_squares(&[(100.0, 0.0), (150.0, 100.0), (200.0, 200.0)]).unwrap();
        assert!(close(fit.slope, 2.0));
        assert!(close(fit.intercept, -200.0));
    }

    #[test]
    fn least_squares_rejects_bad_rows() {
        let dup = fit_least_squares(&[(100.0, 0.0), (100.0, 1.0)]).unwrap_err();
        assert!(dup.to_string().contains("duplicate raw"));
        let zig = fit_least_squares(&[(100.0, 0.0), (200.0, 1.0), (150.0, 0.5)]).unwrap_err();
        assert!(zig.to_string().contains("monotonic"));
        let flat = fit_least_squares(&[(100.0, 5.0), (200.0, 5.0), (300.0, 5.0)]).unwrap_err();
        assert!(flat.to_string().contains("zero slope"));
        assert!(fit_least_squares(&[(1.0, 1.0)]).is_err());
    }

    #[test]
    fn rows_grouped_by_key() {
        let row = |raw, value, key: Option<&str>| keg_config::CalibrationRow {
            raw,
            value,
            key: key.map(str::to_string),
        };
        let fits = fit_rows(&[
            row(100, 0.0, None),
            row(200, 1.0, None),
            row(100, 0.0, Some("3")),
            row(300, 1.0, Some("3")),
        ])
        .unwrap();
        assert_eq!(fits.len(), 2);
        assert_eq!(fits[0].0, DiscriminatorKey::from(3_i64));
        assert!(close(fits[0].1.slope, 0.005));
        assert!(fits[1].0.is_default());
        assert!(close(fits[1].1.slope, 0.01));

        let err = fit_rows(&[row(1, 0.0, Some("x")), row(1, 1.0, Some("x"))]).unwrap_err();
        assert!(err.to_string().contains("key 'x'"));
    }

    #[test]
    fn least_squares_survives_outliers() {
        // value = 0.5 * raw - 50 with small deterministic noise and two gross outliers
        let mut pts: Vec<(f64, f64)> = (0..50)
            .map(|i| {
                let raw = 50.0 + f64::from(i) * 10.0;
                (raw, 0.5 * raw - 50.0 + (f64::from(i) * 37.0).sin() * 0.5)
            })
            .collect();
        pts[15].1 = 500.0;
        pts[35].1 = -500.0;
        let fit = fit_least_squares(&pts).unwrap();
        assert!((fit.slope - 0.5).abs() / 0.5 <= 0.01, "slope {}", fit.slope);
        let zero_at = -fit.intercept / fit.slope;
        assert!((zero_at - 100.0).abs() <= 1.0, "zero at {zero_at}");
    }
}
