use thiserror::Error;

/// Runtime errors around the pipeline (sources, persistence, wiring).
#[derive(Debug, Error, Clone)]
pub enum KegError {
    #[error("frame source error: {0}")]
    Source(String),
    #[error("timeout waiting for frames")]
    SourceTimeout,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("io error: {0}")]
    Io(String),
}

/// Monitor construction errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("missing frame layout")]
    MissingLayout,
    #[error("missing weight channel")]
    MissingWeight,
}

/// Static layout problems. Raised once, when a layout is built.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("invalid layout: field name must not be empty")]
    EmptyName,
    #[error("invalid layout: duplicate field '{0}'")]
    DuplicateField(String),
    #[error("invalid layout: field '{name}' has unsupported width {width} (expected 1, 2 or 4)")]
    BadWidth { name: String, width: u8 },
    #[error("invalid layout: field '{name}' shift {shift} leaves no bits of a {bits}-bit field")]
    ShiftTooLarge { name: String, shift: u8, bits: u8 },
    #[error("invalid layout: field '{name}' has a zero mask")]
    ZeroMask { name: String },
    #[error("invalid layout: field '{name}' is signed and masked; the mask would drop the sign")]
    SignedMask { name: String },
    #[error("invalid layout: field '{name}' offset {offset} overflows")]
    OffsetOverflow { name: String, offset: usize },
    #[error(
        "invalid layout: field '{name}' ends at byte {end} past the declared frame length {frame_len}"
    )]
    PastFrameEnd {
        name: String,
        end: usize,
        frame_len: usize,
    },
    #[error("invalid layout: no fields declared")]
    Empty,
    #[error("invalid layout: channel refers to unknown field '{0}'")]
    UnknownField(String),
}

/// Capture phase of a calibration session, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Empty,
    Loaded,
}

impl core::fmt::Display for CapturePhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Empty => f.write_str("empty"),
            Self::Loaded => f.write_str("loaded"),
        }
    }
}

/// Calibration failures. Terminal for one attempt; installed models are untouched.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("degenerate calibration: both capture points read raw {raw}")]
    DegenerateCalibration { raw: f64 },
    #[error("insufficient samples in {phase} capture: got {got}, need {need}")]
    InsufficientSamples {
        phase: CapturePhase,
        got: usize,
        need: usize,
    },
    #[error("no calibration fit for discriminator key '{0}'")]
    UnknownKey(String),
    #[error("calibration produced a non-finite value: {0}")]
    NonFinite(&'static str),
    #[error("calibration rows invalid: {0}")]
    InvalidRows(String),
    #[error("calibration session: {0}")]
    InvalidState(String),
    #[error("calibration persistence failed: {0}")]
    Persist(String),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
