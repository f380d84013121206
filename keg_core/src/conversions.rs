//! `From`/`TryFrom` implementations bridging `keg_config` types to `keg_core` types.

use std::sync::Arc;
use std::time::Duration;

use keg_config::{
    BatteryMapKind, ChannelsCfg, Config, EndianCfg, FieldCfg, LayoutCfg, PersistedCalibration,
    PersistedFit, SessionCfg, SmoothingCfg, SourceCfg,
};

use crate::buffer::{Endian, Width};
use crate::calibration::{CalibrationModel, DiscriminatorKey, LinearFit};
use crate::conditioner::{ConditionerCfg, Smoothing};
use crate::error::{LayoutError, Result};
use crate::layout::{FieldLayout, FieldSpec};
use crate::monitor::{ChannelMap, Monitor, SourceFilter};
use crate::session::SessionBounds;
use crate::shared::SharedCalibration;
use crate::units::{BatteryMap, DEFAULT_BATTERY_A, TempMap};

// ── Layout ───────────────────────────────────────────────────────────────────

impl From<EndianCfg> for Endian {
    fn from(e: EndianCfg) -> Self {
        match e {
            EndianCfg::Le => Self::Little,
            EndianCfg::Be => Self::Big,
        }
    }
}

impl From<Endian> for EndianCfg {
    fn from(e: Endian) -> Self {
        match e {
            Endian::Little => Self::Le,
            Endian::Big => Self::Be,
        }
    }
}

impl TryFrom<&FieldCfg> for FieldSpec {
    type Error = LayoutError;

    fn try_from(f: &FieldCfg) -> std::result::Result<Self, Self::Error> {
        let width = Width::from_bytes(f.width).ok_or_else(|| LayoutError::BadWidth {
            name: f.name.clone(),
            width: f.width,
        })?;
        Ok(Self {
            offset: f.offset,
            width,
            endian: f.endian.into(),
            signed: f.signed,
            shift: f.shift,
            mask: f.mask,
        })
    }
}

impl TryFrom<&LayoutCfg> for FieldLayout {
    type Error = LayoutError;

    fn try_from(c: &LayoutCfg) -> std::result::Result<Self, Self::Error> {
        let mut b = FieldLayout::builder();
        if let Some(n) = c.frame_len {
            b = b.frame_len(n);
        }
        for f in &c.fields {
            b = b.field(f.name.as_str(), FieldSpec::try_from(f)?);
        }
        b.build()
    }
}

/// Descriptor recorded next to a persisted calibration.
impl From<&FieldLayout> for LayoutCfg {
    fn from(l: &FieldLayout) -> Self {
        Self {
            frame_len: l.frame_len(),
            fields: l
                .iter()
                .map(|(name, s)| FieldCfg {
                    name: name.to_string(),
                    offset: s.offset,
                    width: match s.width {
                        Width::W1 => 1,
                        Width::W2 => 2,
                        Width::W4 => 4,
                    },
                    endian: s.endian.into(),
                    signed: s.signed,
                    shift: s.shift,
                    mask: s.mask,
                })
                .collect(),
        }
    }
}

// ── Conditioning ─────────────────────────────────────────────────────────────

impl From<SmoothingCfg> for Smoothing {
    fn from(s: SmoothingCfg) -> Self {
        match s {
            SmoothingCfg::Median => Self::Median,
            SmoothingCfg::Mean => Self::Mean,
        }
    }
}

impl From<&keg_config::FilterCfg> for ConditionerCfg {
    fn from(c: &keg_config::FilterCfg) -> Self {
        Self {
            outlier_window: c.outlier_window,
            n_sigma: c.n_sigma,
            smooth_window: c.smooth_window,
            smoothing: c.smoothing.into(),
            stable_sd: c.stable_sd,
            stable_slope: c.stable_slope,
        }
    }
}

// ── Channels / source ────────────────────────────────────────────────────────

impl From<&ChannelsCfg> for ChannelMap {
    fn from(c: &ChannelsCfg) -> Self {
        let battery_map = match c.battery_map {
            BatteryMapKind::Linear => BatteryMap::Linear {
                a: c.battery_a.unwrap_or(DEFAULT_BATTERY_A),
                b: c.battery_b.unwrap_or(0.0),
            },
            BatteryMapKind::MillivoltTable => BatteryMap::MillivoltTable,
        };
        Self {
            weight: Arc::from(c.weight.as_str()),
            discriminator: c.discriminator.as_deref().map(Arc::from),
            temperature: c.temperature.as_deref().map(|n| {
                (
                    Arc::from(n),
                    TempMap {
                        scale: c.temp_scale,
                        offset: c.temp_offset,
                    },
                )
            }),
            battery: c.battery.as_deref().map(|n| (Arc::from(n), battery_map)),
        }
    }
}

impl From<&SourceCfg> for SourceFilter {
    fn from(c: &SourceCfg) -> Self {
        Self::new(c.address.as_deref(), c.min_len)
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

impl From<&SessionCfg> for SessionBounds {
    fn from(c: &SessionCfg) -> Self {
        Self {
            min_samples: c.min_samples,
            max_samples: c.max_samples,
            capture: Duration::from_millis(c.capture_ms),
        }
    }
}

// ── Calibration ──────────────────────────────────────────────────────────────

impl From<&PersistedCalibration> for CalibrationModel {
    fn from(p: &PersistedCalibration) -> Self {
        let mut m = p.points.iter().fold(Self::default(), |m, (k, f)| {
            m.with_fit(
                DiscriminatorKey::new(k.as_str()),
                LinearFit {
                    slope: f.slope,
                    intercept: f.intercept,
                },
            )
        });
        m.temp_ref = p.temp_ref;
        m.temp_coeff = p.temp_coeff;
        m.tare_offset = p.tare_offset;
        m
    }
}

/// Persisted form of the model; the layout descriptor is left for the store.
impl From<&CalibrationModel> for PersistedCalibration {
    fn from(m: &CalibrationModel) -> Self {
        let mut p = Self::default();
        p.temp_ref = m.temp_ref;
        p.temp_coeff = m.temp_coeff;
        p.tare_offset = m.tare_offset;
        for (k, f) in m.fits() {
            p.points.insert(
                k.as_str().to_string(),
                PersistedFit {
                    slope: f.slope,
                    intercept: f.intercept,
                },
            );
        }
        p
    }
}

// ── Whole pipeline ───────────────────────────────────────────────────────────

/// Build the live monitor described by `cfg`, reading calibration from `shared`.
pub fn monitor_from_config(cfg: &Config, shared: SharedCalibration) -> Result<Monitor> {
    let layout = FieldLayout::try_from(&cfg.layout)?;
    Monitor::builder()
        .with_layout(layout)
        .with_channels(ChannelMap::from(&cfg.channels))
        .with_conditioner(ConditionerCfg::from(&cfg.filter))
        .with_source_filter(SourceFilter::from(&cfg.source))
        .with_shared_calibration(shared)
        .with_temp_compensation(cfg.calibration.temp_comp)
        .with_auto_tare(cfg.calibration.auto_tare_samples)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout_cfg() -> LayoutCfg {
        LayoutCfg {
            frame_len: Some(17),
            fields: vec![
                FieldCfg {
                    name: "weight".into(),
                    offset: 12,
                    width: 2,
                    endian: EndianCfg::Le,
                    signed: false,
                    shift: 0,
                    mask: None,
                },
                FieldCfg {
                    name: "state".into(),
                    offset: 14,
                    width: 1,
                    endian: EndianCfg::Le,
                    signed: false,
                    shift: 0,
                    mask: Some(0x0F),
                },
            ],
        }
    }

    #[test]
    fn layout_descriptor_round_trips() {
        let cfg = layout_cfg();
        let layout = FieldLayout::try_from(&cfg).unwrap();
        assert_eq!(LayoutCfg::from(&layout), cfg);
    }

    #[test]
    fn bad_width_is_layout_error() {
        let mut cfg = layout_cfg();
        cfg.fields[0].width = 3;
        assert!(matches!(
            FieldLayout::try_from(&cfg),
            Err(LayoutError::BadWidth { width: 3, .. })
        ));
    }

    #[test]
    fn persisted_model_round_trips() {
        let model = CalibrationModel::default()
            .with_fit(
                DiscriminatorKey::from(2_i64),
                LinearFit {
                    slope: 0.5,
                    intercept: -1.0,
                },
            )
            .with_temp_compensation(20.0, 0.01)
            .with_tare(0.25);
        let p = PersistedCalibration::from(&model);
        assert_eq!(p.points["2"].slope, 0.5);
        assert_eq!(p.temp_ref, Some(20.0));
        assert_eq!(p.temp_coeff, Some(0.01));
        assert_eq!(p.tare_offset, Some(0.25));
        assert_eq!(CalibrationModel::from(&p), model);
    }
}
