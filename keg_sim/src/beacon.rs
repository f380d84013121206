//! Synthetic advertisements for running the pipeline without a radio.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use keg_config::{ChannelsCfg, LayoutCfg};
use keg_traits::{FrameSource, RawFrame};

use crate::encode::{or_field, put_field};
use crate::error::Result;

/// Live knobs of a running beacon. Clones control the same beacon.
#[derive(Debug, Clone, Default)]
pub struct BeaconControl {
    inner: Arc<Knobs>,
}

#[derive(Debug, Default)]
struct Knobs {
    weight: AtomicI64,
    state: AtomicI64,
    temperature: AtomicI64,
    battery: AtomicI64,
}

impl BeaconControl {
    pub fn set_weight(&self, raw: i64) {
        self.inner.weight.store(raw, Ordering::Relaxed);
    }
    pub fn weight(&self) -> i64 {
        self.inner.weight.load(Ordering::Relaxed)
    }
    pub fn set_state(&self, v: i64) {
        self.inner.state.store(v, Ordering::Relaxed);
    }
    pub fn set_temperature(&self, raw: i64) {
        self.inner.temperature.store(raw, Ordering::Relaxed);
    }
    pub fn set_battery(&self, raw: i64) {
        self.inner.battery.store(raw, Ordering::Relaxed);
    }
}

/// Which layout field carries which simulated quantity.
#[derive(Debug, Clone)]
pub struct FieldRoles {
    pub weight: String,
    pub state: Option<String>,
    pub temperature: Option<String>,
    pub battery: Option<String>,
    pub sequence: Option<String>,
}

impl Default for FieldRoles {
    fn default() -> Self {
        Self {
            weight: "weight".into(),
            state: Some("state".into()),
            temperature: Some("temperature".into()),
            battery: Some("battery".into()),
            sequence: Some("sequence".into()),
        }
    }
}

impl From<&ChannelsCfg> for FieldRoles {
    fn from(c: &ChannelsCfg) -> Self {
        Self {
            weight: c.weight.clone(),
            state: c.discriminator.clone(),
            temperature: c.temperature.clone(),
            battery: c.battery.clone(),
            sequence: Some("sequence".into()),
        }
    }
}

/// Additive noise on the weight field: uniform in ±amplitude, plus a spike
/// of `spike_height` every `spike_every` frames (0 = never).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoiseProfile {
    pub amplitude: i64,
    pub spike_every: u32,
    pub spike_height: i64,
}

pub struct SimulatedBeacon {
    address: String,
    layout: LayoutCfg,
    roles: FieldRoles,
    frame_len: usize,
    control: BeaconControl,
    noise: NoiseProfile,
    rng: u32,
    seq: u64,
    t_ms: u64,
    period: Duration,
    remaining: Option<u64>,
    paced: bool,
    rssi: i16,
}

impl SimulatedBeacon {
    pub fn new(address: impl Into<String>, layout: LayoutCfg) -> Self {
        let min_len = layout
            .fields
            .iter()
            .map(|f| f.offset + usize::from(f.width))
            .max()
            .unwrap_or(0);
        let frame_len = layout.frame_len.unwrap_or(min_len).max(min_len);
        Self {
            address: address.into(),
            layout,
            roles: FieldRoles::default(),
            frame_len,
            control: BeaconControl::default(),
            noise: NoiseProfile::default(),
            rng: 0x2545_F491,
            seq: 0,
            t_ms: 0,
            period: Duration::from_millis(100),
            remaining: None,
            paced: false,
            rssi: -62,
        }
    }

    pub fn with_roles(mut self, roles: FieldRoles) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_noise(mut self, noise: NoiseProfile, seed: u32) -> Self {
        self.noise = noise;
        self.rng = seed.max(1);
        self
    }

    /// Advertising interval; also the step of `received_ms`.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Stop after `n` frames.
    pub fn with_limit(mut self, n: u64) -> Self {
        self.remaining = Some(n);
        self
    }

    /// Sleep one period (bounded by the caller's timeout) before each frame.
    pub fn paced(mut self, on: bool) -> Self {
        self.paced = on;
        self
    }

    pub fn control(&self) -> BeaconControl {
        self.control.clone()
    }

    fn next_rand(&mut self) -> u32 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        x
    }

    fn noisy_weight(&mut self) -> i64 {
        let mut w = self.control.weight();
        if self.noise.amplitude > 0 {
            let span = self.noise.amplitude * 2 + 1;
            w += i64::from(self.next_rand()) % span - self.noise.amplitude;
        }
        if self.noise.spike_every > 0 && self.seq % u64::from(self.noise.spike_every) == 0 && self.seq > 0 {
            w += self.noise.spike_height;
        }
        w
    }

    /// Encode the next payload.
    pub fn encode_next(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.frame_len];
        let weight = self.noisy_weight();
        let knobs = &self.control.inner;
        let values = [
            (Some(self.roles.weight.as_str()), weight),
            (self.roles.state.as_deref(), knobs.state.load(Ordering::Relaxed)),
            (
                self.roles.temperature.as_deref(),
                knobs.temperature.load(Ordering::Relaxed),
            ),
            (self.roles.battery.as_deref(), knobs.battery.load(Ordering::Relaxed)),
            (
                self.roles.sequence.as_deref(),
                i64::try_from(self.seq).unwrap_or(i64::MAX),
            ),
        ];
        for (name, value) in values {
            let Some(name) = name else { continue };
            for field in self.layout.fields.iter().filter(|f| f.name == name) {
                if field.mask.is_some() {
                    or_field(&mut buf, field, value)?;
                } else {
                    put_field(&mut buf, field, value)?;
                }
            }
        }
        self.seq += 1;
        Ok(buf)
    }
}

impl FrameSource for SimulatedBeacon {
    fn next_frame(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<Option<RawFrame>, Box<dyn std::error::Error + Send + Sync>> {
        match self.remaining {
            Some(0) => return Ok(None),
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        if self.paced {
            std::thread::sleep(self.period.min(timeout));
        }
        let payload = self.encode_next()?;
        let frame = RawFrame::new(self.address.clone(), self.t_ms, payload).with_rssi(self.rssi);
        self.t_ms += u64::try_from(self.period.as_millis()).unwrap_or(u64::MAX);
        tracing::trace!(seq = self.seq, len = frame.payload.len(), "simulated frame");
        Ok(Some(frame))
    }

    fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}
