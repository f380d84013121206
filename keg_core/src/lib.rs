#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Keg scale telemetry pipeline (radio-agnostic).
//!
//! Advertisement payloads arrive as `keg_traits::RawFrame`s and flow through:
//!
//! ```text
//! RawFrame ─► FrameDecoder(FieldLayout) ─► DecodedFrame
//!          ─► SignalConditioner (Hampel ─► smoothing ─► stability gate)
//!          ─► CalibrationModel (per-key fit, temperature, tare) ─► Reading
//! ```
//!
//! ## Modules
//!
//! - **Decoding**: `buffer` (bounds-checked reads), `layout` (validated field
//!   map), `decoder` (never fails on malformed input)
//! - **Conditioning**: `conditioner`, with window statistics in `stats`
//! - **Calibration**: `calibration` (model and fits), `tare`, `session`
//!   (guided two-point procedure), `store` (JSON persistence), `shared`
//!   (atomic model swap)
//! - **Live pipeline**: `monitor` (per-device state), `feed` (source thread),
//!   `runner` (frame loop)
//!
//! Short frames are never errors (fields are `None`) and an uncalibrated key
//! is never an error (`apply` returns `None`).

pub mod atomic;
pub mod buffer;
pub mod builder;
pub mod calibration;
pub mod conditioner;
pub mod conversions;
pub mod decoder;
pub mod error;
pub mod feed;
pub mod layout;
pub mod mocks;
pub mod monitor;
pub mod runner;
pub mod session;
pub mod shared;
pub mod source_error;
pub mod stats;
pub mod store;
pub mod tare;
pub mod units;

pub use buffer::{Endian, FrameBuffer, Width};
pub use builder::MonitorBuilder;
pub use calibration::{
    CalibrationModel, DiscriminatorKey, LinearFit, fit_least_squares, fit_rows, fit_two_point,
};
pub use conditioner::{ConditionedSample, ConditionerCfg, HampelFilter, SignalConditioner, Smoothing};
pub use conversions::monitor_from_config;
pub use decoder::{DecodedFrame, FrameDecoder};
pub use error::{BuildError, CalibrationError, CapturePhase, KegError, LayoutError, Report, Result};
pub use layout::{FieldLayout, FieldSpec, names};
pub use monitor::{ChannelMap, DisplayedValue, Monitor, Reading, SourceFilter};
pub use runner::{FeedMode, ReadingSink, RunOptions, RunSummary, run};
pub use session::{CalibrationSession, SessionBounds, SessionState};
pub use shared::SharedCalibration;
pub use store::{CalibrationStore, JsonFileStore, LayoutMatch, MemoryStore};
pub use tare::TareCapture;
