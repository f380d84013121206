//! Frame sources that do not need a radio: a synthetic beacon and CSV
//! capture replay.

pub mod beacon;
pub mod encode;
pub mod error;
pub mod replay;

pub use beacon::{BeaconControl, FieldRoles, NoiseProfile, SimulatedBeacon};
pub use encode::{or_field, put_field};
pub use error::{Result, SimError};
pub use replay::{CAPTURE_HEADER, CaptureReplay, CaptureWriter};
