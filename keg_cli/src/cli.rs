//! CLI argument definitions and shared statics.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "kegscale", version, about = "Keg scale telemetry CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/kegscale.toml")]
    pub config: PathBuf,

    /// Override calibration.path from the config
    #[arg(long, value_name = "FILE")]
    pub calibration: Option<PathBuf>,

    /// Output JSON lines (readings, results and errors) instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); RUST_LOG wins when set
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Where frames come from. Without `--replay` a simulated beacon is used.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Replay a capture CSV (received_ms,address,rssi,payload_hex)
    #[arg(long, value_name = "FILE")]
    pub replay: Option<PathBuf>,

    /// Replay at the recorded pace
    #[arg(long, action = ArgAction::SetTrue, requires = "replay")]
    pub realtime: bool,

    /// Simulated weight raw value
    #[arg(long, value_name = "RAW", default_value_t = 8_000)]
    pub sim_raw: i64,

    /// Simulated noise amplitude in raw counts
    #[arg(long, value_name = "COUNTS", default_value_t = 3)]
    pub sim_noise: i64,

    /// Simulated discriminator (state) value
    #[arg(long, value_name = "VALUE")]
    pub sim_state: Option<i64>,

    /// Simulated temperature raw value
    #[arg(long, value_name = "RAW")]
    pub sim_temp: Option<i64>,

    /// Emit simulated frames as fast as they are consumed
    #[arg(long, action = ArgAction::SetTrue)]
    pub fast: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream readings from the simulator or a capture
    Monitor {
        #[command(flatten)]
        source: SourceArgs,
        /// Stop after this many frames
        #[arg(long, value_name = "N")]
        max_frames: Option<u64>,
        /// Poll the source on the main thread instead of a feed thread
        #[arg(long, action = ArgAction::SetTrue)]
        direct: bool,
    },
    /// Fit a calibration: guided two-point capture, or offline from a CSV
    Calibrate {
        /// Known value of the reference load, in output units
        #[arg(long, value_name = "VALUE", required_unless_present = "from_csv")]
        known: Option<f64>,
        /// Discriminator key the fit applies to (default key when absent)
        #[arg(long, value_name = "KEY")]
        key: Option<String>,
        /// Fit offline from rows `raw,value[,key]`
        #[arg(long, value_name = "FILE", conflicts_with = "known")]
        from_csv: Option<PathBuf>,
        /// Simulated weight raw value while loaded
        #[arg(long, value_name = "RAW")]
        sim_loaded: Option<i64>,
        /// Do not wait for Enter between phases
        #[arg(long, short = 'y', action = ArgAction::SetTrue)]
        yes: bool,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Zero the scale at its current settled reading and persist the offset
    Tare {
        /// Remove the stored tare offset instead
        #[arg(long, action = ArgAction::SetTrue)]
        clear: bool,
        /// Give up after this many frames without a settled reading
        #[arg(long, value_name = "N", default_value_t = 500)]
        max_frames: u64,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Decode one payload with the configured layout
    Decode {
        /// Payload bytes as hex (spaces and colons allowed)
        #[arg(long, value_name = "HEX")]
        hex: String,
    },
    /// Validate config, layout and stored calibration
    SelfCheck,
}
