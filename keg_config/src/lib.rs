#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas, persisted calibration and calibration CSV parsing.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - `PersistedCalibration` is the JSON form of a calibration model, keyed by
//!   discriminator, plus the layout descriptor that produced it.
//! - The calibration CSV loader enforces headers and row shape; fitting is
//!   done by `keg_core`.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Key used for fits when the frame carries no discriminator.
pub const DEFAULT_KEY: &str = "default";

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EndianCfg {
    #[default]
    #[serde(alias = "little")]
    Le,
    #[serde(alias = "big")]
    Be,
}

/// One field of the frame layout, as written in TOML and in the persisted
/// calibration's `parser` descriptor.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct FieldCfg {
    pub name: String,
    pub offset: usize,
    /// Field width in bytes: 1, 2 or 4.
    pub width: u8,
    #[serde(default)]
    pub endian: EndianCfg,
    #[serde(default)]
    pub signed: bool,
    #[serde(default)]
    pub shift: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Default)]
pub struct LayoutCfg {
    /// Declared frame length. Fields reaching past it are rejected at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_len: Option<usize>,
    pub fields: Vec<FieldCfg>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SourceCfg {
    /// Only frames from this address are processed (case and colon insensitive).
    pub address: Option<String>,
    /// Frames shorter than this are ignored before decoding.
    pub min_len: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatteryMapKind {
    #[default]
    Linear,
    MillivoltTable,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelsCfg {
    /// Layout field feeding the conditioned (calibrated) channel.
    pub weight: String,
    /// Layout field selecting the calibration fit.
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub temperature: Option<String>,
    /// Degrees Celsius per raw count (0.1 for deci-degrees).
    #[serde(default = "default_temp_scale")]
    pub temp_scale: f64,
    #[serde(default)]
    pub temp_offset: f64,
    #[serde(default)]
    pub battery: Option<String>,
    #[serde(default)]
    pub battery_map: BatteryMapKind,
    /// Percent per raw count for the linear battery map.
    #[serde(default)]
    pub battery_a: Option<f64>,
    #[serde(default)]
    pub battery_b: Option<f64>,
}

fn default_temp_scale() -> f64 {
    0.1
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SmoothingCfg {
    #[default]
    Median,
    Mean,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FilterCfg {
    /// Hampel window (samples). Must be >= 3.
    pub outlier_window: usize,
    /// Rejection threshold in robust standard deviations.
    pub n_sigma: f64,
    pub smooth_window: usize,
    pub smoothing: SmoothingCfg,
    /// Stability gate: population stdev threshold on raw counts.
    pub stable_sd: f64,
    /// Stability gate: absolute slope threshold in counts per sample.
    pub stable_slope: f64,
}

impl Default for FilterCfg {
    fn default() -> Self {
        Self {
            outlier_window: 7,
            n_sigma: 3.5,
            smooth_window: 5,
            smoothing: SmoothingCfg::Median,
            stable_sd: 4.0,
            stable_slope: 1.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CalibrationCfg {
    /// Persisted calibration JSON.
    pub path: String,
    /// Apply temperature compensation when the model carries temp_ref/temp_coeff.
    pub temp_comp: bool,
    /// Floor tared values at zero (physically non-negative quantities).
    pub non_negative: bool,
    /// When > 0, tare from the median of the first N committed raw values.
    pub auto_tare_samples: usize,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            path: "keg_cal.json".to_string(),
            temp_comp: false,
            non_negative: true,
            auto_tare_samples: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionCfg {
    /// Fewer accepted samples than this in a capture phase fails the session.
    pub min_samples: usize,
    /// A capture phase ends once this many samples were accepted.
    pub max_samples: usize,
    /// A capture phase ends after this long regardless of sample count.
    pub capture_ms: u64,
}

impl Default for SessionCfg {
    fn default() -> Self {
        Self {
            min_samples: 3,
            max_samples: 40,
            capture_ms: 4_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub source: SourceCfg,
    pub layout: LayoutCfg,
    pub channels: ChannelsCfg,
    #[serde(default)]
    pub filter: FilterCfg,
    #[serde(default)]
    pub calibration: CalibrationCfg,
    #[serde(default)]
    pub session: SessionCfg,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Layout (structural checks on widths/shifts happen when the core builds the layout)
        if self.layout.fields.is_empty() {
            eyre::bail!("layout.fields must declare at least one field");
        }
        let has_field = |name: &str| self.layout.fields.iter().any(|f| f.name == name);

        // Channels
        if !has_field(&self.channels.weight) {
            eyre::bail!(
                "channels.weight refers to unknown layout field '{}'",
                self.channels.weight
            );
        }
        for (what, name) in [
            ("discriminator", &self.channels.discriminator),
            ("temperature", &self.channels.temperature),
            ("battery", &self.channels.battery),
        ] {
            if let Some(n) = name
                && !has_field(n)
            {
                eyre::bail!("channels.{what} refers to unknown layout field '{n}'");
            }
        }
        if !self.channels.temp_scale.is_finite() || self.channels.temp_scale == 0.0 {
            eyre::bail!("channels.temp_scale must be finite and non-zero");
        }
        if !self.channels.temp_offset.is_finite() {
            eyre::bail!("channels.temp_offset must be finite");
        }
        for v in [self.channels.battery_a, self.channels.battery_b]
            .into_iter()
            .flatten()
        {
            if !v.is_finite() {
                eyre::bail!("channels.battery_a/battery_b must be finite");
            }
        }

        // Filter
        if self.filter.outlier_window < 3 {
            eyre::bail!("filter.outlier_window must be >= 3");
        }
        if self.filter.smooth_window < 2 {
            eyre::bail!("filter.smooth_window must be >= 2");
        }
        if !(self.filter.n_sigma.is_finite() && self.filter.n_sigma > 0.0) {
            eyre::bail!("filter.n_sigma must be > 0");
        }
        if !(self.filter.stable_sd.is_finite() && self.filter.stable_sd > 0.0) {
            eyre::bail!("filter.stable_sd must be > 0");
        }
        if !(self.filter.stable_slope.is_finite() && self.filter.stable_slope > 0.0) {
            eyre::bail!("filter.stable_slope must be > 0");
        }

        // Calibration
        if self.calibration.path.trim().is_empty() {
            eyre::bail!("calibration.path must not be empty");
        }

        // Session
        if self.session.min_samples == 0 {
            eyre::bail!("session.min_samples must be >= 1");
        }
        if self.session.max_samples < self.session.min_samples {
            eyre::bail!("session.max_samples must be >= session.min_samples");
        }
        if self.session.capture_ms == 0 {
            eyre::bail!("session.capture_ms must be >= 1");
        }
        if self.session.capture_ms > 10 * 60 * 1000 {
            eyre::bail!("session.capture_ms is unreasonably large (>10min)");
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly, got '{r}'");
        }

        Ok(())
    }
}

// ── Persisted calibration ────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct PersistedFit {
    pub slope: f64,
    pub intercept: f64,
}

/// On-disk calibration.
///
/// Example:
/// ```json
/// {
///   "points": { "default": { "slope": -0.004, "intercept": 4.0 } },
///   "temp_ref": 20.0,
///   "temp_coeff": 0.0,
///   "parser": { "fields": [ { "name": "weight", "offset": 12, "width": 2, ... } ] }
/// }
/// ```
///
/// Files written by the older single-fit tooling carry top-level `slope` and
/// `intercept`; those are folded into the default key on load.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct PersistedCalibration {
    #[serde(default)]
    pub points: BTreeMap<String, PersistedFit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_ref: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_coeff: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tare_offset: Option<f64>,
    /// Layout that produced the raw values this calibration was fitted on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser: Option<LayoutCfg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing)]
    slope: Option<f64>,
    #[serde(default, skip_serializing)]
    intercept: Option<f64>,
}

impl PersistedCalibration {
    /// Parse JSON text, folding a legacy single fit into the default key.
    pub fn from_json(s: &str) -> eyre::Result<Self> {
        let mut p: Self = serde_json::from_str(s)
            .map_err(|e| eyre::eyre!("invalid calibration JSON: {e}"))?;
        if let (Some(slope), Some(intercept)) = (p.slope.take(), p.intercept.take()) {
            p.points
                .entry(DEFAULT_KEY.to_string())
                .or_insert(PersistedFit { slope, intercept });
        }
        for (key, fit) in &p.points {
            if !(fit.slope.is_finite() && fit.intercept.is_finite()) {
                eyre::bail!("calibration entry '{key}' has a non-finite slope/intercept");
            }
        }
        Ok(p)
    }

    pub fn to_json_pretty(&self) -> eyre::Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| eyre::eyre!("serialize calibration: {e}"))
    }

    /// Stamp the update time.
    pub fn touch(&mut self) {
        self.updated = Some(chrono::Utc::now());
    }
}

/// Load a persisted calibration. A missing file is not an error.
pub fn load_calibration_json(path: &Path) -> eyre::Result<Option<PersistedCalibration>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read calibration {:?}: {}", path, e))?;
    PersistedCalibration::from_json(&text).map(Some)
}

// ── Calibration CSV ──────────────────────────────────────────────────────────

/// Calibration CSV schema.
///
/// Expected headers: `raw,value` or `raw,value,key`
///
/// Example:
/// raw,value,key
/// 1000,0.0,3
/// 500,2.0,3
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CalibrationRow {
    pub raw: i64,
    pub value: f64,
    #[serde(default)]
    pub key: Option<String>,
}

pub fn load_calibration_csv(path: &Path) -> eyre::Result<Vec<CalibrationRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != ["raw", "value"] && actual != ["raw", "value", "key"] {
        eyre::bail!(
            "calibration CSV must have headers 'raw,value' or 'raw,value,key', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<CalibrationRow>().enumerate() {
        match rec {
            Ok(mut row) => {
                if row.key.as_deref().is_some_and(|k| k.is_empty()) {
                    row.key = None;
                }
                rows.push(row);
            }
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    if rows.is_empty() {
        eyre::bail!("calibration CSV {:?} has no rows", path);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_single_fit_lands_on_default_key() {
        let p = PersistedCalibration::from_json(
            r#"{ "slope": 0.001, "intercept": -2.5, "temp_ref": 20.0 }"#,
        )
        .unwrap();
        assert_eq!(
            p.points.get(DEFAULT_KEY),
            Some(&PersistedFit {
                slope: 0.001,
                intercept: -2.5
            })
        );
        assert_eq!(p.temp_ref, Some(20.0));
        let out: serde_json::Value = serde_json::from_str(&p.to_json_pretty().unwrap()).unwrap();
        assert!(out.get("slope").is_none());
        assert_eq!(out["points"]["default"]["intercept"], -2.5);
    }

    #[test]
    fn explicit_point_wins_over_legacy_fields() {
        let p = PersistedCalibration::from_json(
            r#"{ "slope": 9.0, "intercept": 9.0,
                 "points": { "default": { "slope": 1.0, "intercept": 0.0 } } }"#,
        )
        .unwrap();
        assert_eq!(p.points[DEFAULT_KEY].slope, 1.0);
    }

    #[test]
    fn endian_accepts_long_names() {
        let f: FieldCfg = toml::from_str(
            r#"name = "weight"
offset = 12
width = 2
endian = "big""#,
        )
        .unwrap();
        assert_eq!(f.endian, EndianCfg::Be);
        assert!(!f.signed);
        assert_eq!(f.mask, None);
    }
}
