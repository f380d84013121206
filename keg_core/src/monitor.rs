//! Per-device live pipeline: decode -> condition -> calibrate.
//!
//! A `Monitor` owns one `DeviceState` per source id; nothing is shared across
//! devices except the installed calibration model, which is read through an
//! immutable snapshot per frame. Auto-tare is captured and held per device. Processing a frame never fails: anomalies
//! are absorbed as absent fields or a reading with no value.

use std::collections::HashMap;
use std::sync::Arc;

use keg_traits::RawFrame;

use crate::calibration::DiscriminatorKey;
use crate::conditioner::{ConditionerCfg, SignalConditioner};
use crate::decoder::{DecodedFrame, FrameDecoder};
use crate::error::CalibrationError;
use crate::shared::SharedCalibration;
use crate::tare::{TareCapture, tare_offset};
use crate::units::{BatteryMap, TempMap};

/// Which layout fields feed which quantity.
#[derive(Debug, Clone)]
pub struct ChannelMap {
    pub weight: Arc<str>,
    pub discriminator: Option<Arc<str>>,
    pub temperature: Option<(Arc<str>, TempMap)>,
    pub battery: Option<(Arc<str>, BatteryMap)>,
}

impl ChannelMap {
    pub fn weight(field: impl Into<Arc<str>>) -> Self {
        Self {
            weight: field.into(),
            discriminator: None,
            temperature: None,
            battery: None,
        }
    }

    pub(crate) fn field_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(&*self.weight)
            .chain(self.discriminator.as_deref())
            .chain(self.temperature.as_ref().map(|(n, _)| &**n))
            .chain(self.battery.as_ref().map(|(n, _)| &**n))
    }
}

/// Frames the monitor ignores before decoding.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    address: Option<String>,
    pub min_len: usize,
}

fn normalize_address(a: &str) -> String {
    a.chars()
        .filter(|c| !matches!(c, ':' | '-'))
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

impl SourceFilter {
    pub fn new(address: Option<&str>, min_len: usize) -> Self {
        Self {
            address: address.map(normalize_address),
            min_len,
        }
    }

    pub fn matches(&self, frame: &RawFrame) -> bool {
        if frame.payload.len() < self.min_len {
            return false;
        }
        match &self.address {
            Some(want) => normalize_address(&frame.source_id) == *want,
            None => true,
        }
    }
}

/// The last value that passed the stability gate. Only this is "the current reading".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayedValue {
    pub committed_value: f64,
    pub last_update_ms: u64,
}

/// Everything known about one processed frame.
#[derive(Debug, Clone)]
pub struct Reading {
    pub frame: DecodedFrame,
    pub discriminator: Option<DiscriminatorKey>,
    /// The weight raw value was dropped by the outlier filter.
    pub rejected: bool,
    /// Smoothed raw counts.
    pub instantaneous: Option<f64>,
    /// Raw counts committed by the stability gate on this frame.
    pub committed: Option<f64>,
    /// `instantaneous` in physical units; `None` when uncalibrated.
    pub value: Option<f64>,
    /// `committed` in physical units.
    pub committed_value: Option<f64>,
    /// Held display value, which may be from an earlier frame.
    pub displayed: Option<DisplayedValue>,
    pub temperature_c: Option<f64>,
    pub battery_pct: Option<u8>,
}

impl Reading {
    pub fn source_id(&self) -> &str {
        &self.frame.source_id
    }
}

#[derive(Debug)]
struct DeviceState {
    conditioner: SignalConditioner,
    key: Option<DiscriminatorKey>,
    displayed: Option<DisplayedValue>,
    last_committed_raw: Option<f64>,
    last_temp_c: Option<f64>,
    /// Pending auto-tare; `None` once installed or when disabled.
    auto_tare: Option<TareCapture>,
    /// Auto-tare offset; overrides the model's tare for this device.
    tare: Option<f64>,
}

impl DeviceState {
    fn new(cfg: ConditionerCfg, auto_tare_samples: usize) -> Self {
        Self {
            conditioner: SignalConditioner::new(cfg),
            key: None,
            displayed: None,
            last_committed_raw: None,
            last_temp_c: None,
            auto_tare: (auto_tare_samples > 0).then(|| TareCapture::new(auto_tare_samples)),
            tare: None,
        }
    }

    fn clear_channel(&mut self) {
        self.conditioner.reset();
        self.displayed = None;
        self.last_committed_raw = None;
    }
}

pub struct Monitor {
    pub(crate) decoder: FrameDecoder,
    pub(crate) channels: ChannelMap,
    pub(crate) filter: SourceFilter,
    pub(crate) conditioner: ConditionerCfg,
    pub(crate) calibration: SharedCalibration,
    pub(crate) temp_comp: bool,
    pub(crate) auto_tare_samples: usize,
    devices: HashMap<String, DeviceState>,
}

impl core::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Monitor")
            .field("weight", &self.channels.weight)
            .field("devices", &self.devices.len())
            .field("temp_comp", &self.temp_comp)
            .finish_non_exhaustive()
    }
}

impl Monitor {
    pub(crate) fn from_parts(
        decoder: FrameDecoder,
        channels: ChannelMap,
        filter: SourceFilter,
        conditioner: ConditionerCfg,
        calibration: SharedCalibration,
        temp_comp: bool,
        auto_tare_samples: usize,
    ) -> Self {
        Self {
            decoder,
            channels,
            filter,
            conditioner,
            calibration,
            temp_comp,
            auto_tare_samples,
            devices: HashMap::new(),
        }
    }

    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    pub fn calibration(&self) -> &SharedCalibration {
        &self.calibration
    }

    /// Process one frame. `None` when the source filter dropped it.
    pub fn process(&mut self, frame: &RawFrame) -> Option<Reading> {
        if !self.filter.matches(frame) {
            tracing::trace!(source = %frame.source_id, len = frame.payload.len(), "frame filtered");
            return None;
        }
        let decoded = self.decoder.decode(frame);
        let frame_key = self
            .channels
            .discriminator
            .as_deref()
            .and_then(|name| decoded.get(name))
            .map(DiscriminatorKey::from);
        // a configured discriminator the frame does not carry: keep the device's
        // range and do not feed a weight of unknown range into the filter
        let key_missing = self.channels.discriminator.is_some() && frame_key.is_none();
        let temperature_c = self
            .channels
            .temperature
            .as_ref()
            .and_then(|(name, map)| decoded.get(name).map(|raw| map.celsius(raw)));
        let battery_pct = self
            .channels
            .battery
            .as_ref()
            .and_then(|(name, map)| decoded.get(name).map(|raw| map.percent(raw)));

        let (cfg, auto_tare_samples) = (self.conditioner, self.auto_tare_samples);
        let dev = self
            .devices
            .entry(frame.source_id.clone())
            .or_insert_with(|| DeviceState::new(cfg, auto_tare_samples));
        if let (Some(old), Some(new)) = (dev.key.as_ref(), frame_key.as_ref())
            && old != new
        {
            tracing::debug!(
                source = %frame.source_id,
                from = %old,
                to = %new,
                "discriminator changed; resetting channel"
            );
            dev.clear_channel();
            // a tare taken in the old range does not carry over
            dev.tare = None;
            if dev.auto_tare.is_some() {
                dev.auto_tare = Some(TareCapture::new(auto_tare_samples));
            }
        }
        if frame_key.is_some() {
            dev.key.clone_from(&frame_key);
        }
        if temperature_c.is_some() {
            dev.last_temp_c = temperature_c;
        }
        let key = dev.key.clone();

        let sample = if key_missing {
            tracing::trace!(source = %frame.source_id, "no discriminator; weight ignored");
            None
        } else {
            decoded
                .get(&self.channels.weight)
                .map(|raw| dev.conditioner.update(raw))
        };
        let rejected = sample.is_some_and(|s| s.rejected);
        let instantaneous = sample.and_then(|s| s.instantaneous);
        let committed = sample.and_then(|s| s.committed);
        if committed.is_some() {
            dev.last_committed_raw = committed;
        }

        let temp_for_model = if self.temp_comp { temperature_c } else { None };
        let model = self.calibration.load();

        if let (Some(capture), Some(raw)) = (dev.auto_tare.as_mut(), committed)
            && let Some(tare_raw) = capture.offer(raw)
        {
            match tare_offset(&model, tare_raw, key.as_ref(), temp_for_model) {
                Ok(offset) => {
                    dev.tare = Some(offset);
                    tracing::info!(source = %frame.source_id, tare_raw, offset, "auto-tare installed");
                }
                Err(e) => {
                    tracing::warn!(source = %frame.source_id, error = %e, "auto-tare skipped");
                }
            }
            dev.auto_tare = None;
        }

        let tare = dev.tare.or(model.tare_offset);
        let to_value = |raw: f64| model.apply_tare(raw, key.as_ref(), temp_for_model, tare);
        let value = instantaneous.and_then(to_value);
        let committed_value = committed.and_then(to_value);
        if let Some(v) = committed_value {
            dev.displayed = Some(DisplayedValue {
                committed_value: v,
                last_update_ms: frame.received_ms,
            });
        }

        Some(Reading {
            frame: decoded,
            discriminator: frame_key,
            rejected,
            instantaneous,
            committed,
            value,
            committed_value,
            displayed: dev.displayed,
            temperature_c,
            battery_pct,
        })
    }

    /// Currently displayed value for `source_id`.
    pub fn displayed(&self, source_id: &str) -> Option<DisplayedValue> {
        self.devices.get(source_id).and_then(|d| d.displayed)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Auto-tare offset held for `source_id`, once its capture completed.
    pub fn device_tare(&self, source_id: &str) -> Option<f64> {
        self.devices.get(source_id).and_then(|d| d.tare)
    }

    /// Tare at the last committed raw value of `source_id` and install it in
    /// the shared model. Replaces any auto-tare held for that device.
    pub fn tare_now(&mut self, source_id: &str) -> Result<f64, CalibrationError> {
        let dev = self.devices.get_mut(source_id).ok_or_else(|| {
            CalibrationError::InvalidState(format!("no readings from '{source_id}' yet"))
        })?;
        let raw = dev.last_committed_raw.ok_or_else(|| {
            CalibrationError::InvalidState(format!("'{source_id}' has not settled yet"))
        })?;
        let temp = if self.temp_comp { dev.last_temp_c } else { None };
        let offset = tare_offset(&self.calibration.load(), raw, dev.key.as_ref(), temp)?;
        self.calibration.update(|m| m.clone().with_tare(offset));
        dev.tare = None;
        dev.auto_tare = None;
        tracing::info!(source = source_id, raw, offset, "tare installed");
        Ok(offset)
    }

    /// Remove the model's tare and every device's auto-tare.
    pub fn clear_tare(&mut self) {
        self.calibration.update(|m| m.clone().without_tare());
        for dev in self.devices.values_mut() {
            dev.tare = None;
            dev.auto_tare = None;
        }
    }

    /// Forget the channel state of one device. Calibration is not affected.
    pub fn reset(&mut self, source_id: &str) {
        if let Some(dev) = self.devices.get_mut(source_id) {
            dev.clear_channel();
        }
    }

    pub fn reset_all(&mut self) {
        self.devices.clear();
    }
}
