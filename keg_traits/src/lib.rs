//! Seams between the telemetry pipeline and the outside world.
//!
//! The radio side (scanning, discovery, connection handling) lives outside
//! this workspace. It hands over advertisement payloads as [`RawFrame`]s
//! through the [`FrameSource`] trait.
pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// One received advertisement payload, exactly as the scanner saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Device address (or any stable identifier of the sender).
    pub source_id: String,
    /// Receive time in milliseconds since a source-defined epoch.
    /// Non-decreasing per source.
    pub received_ms: u64,
    /// Received signal strength in dBm, when the scanner reports it.
    pub rssi: Option<i16>,
    /// Opaque vendor payload (service data or manufacturer data).
    pub payload: Vec<u8>,
}

impl RawFrame {
    pub fn new(source_id: impl Into<String>, received_ms: u64, payload: Vec<u8>) -> Self {
        Self {
            source_id: source_id.into(),
            received_ms,
            rssi: None,
            payload,
        }
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }
}

/// Anything that delivers advertisement frames.
///
/// `Ok(None)` means no frame arrived within `timeout`; it is not an error.
/// Sources that are exhausted (replays, finite simulations) report it through
/// [`FrameSource::is_exhausted`].
pub trait FrameSource {
    fn next_frame(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Option<RawFrame>, Box<dyn std::error::Error + Send + Sync>>;

    fn is_exhausted(&self) -> bool {
        false
    }
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn next_frame(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Option<RawFrame>, Box<dyn std::error::Error + Send + Sync>> {
        (**self).next_frame(timeout)
    }

    fn is_exhausted(&self) -> bool {
        (**self).is_exhausted()
    }
}
