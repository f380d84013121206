//! Replay of recorded advertisements from CSV captures.
//!
//! Format: a header row followed by `received_ms,address,rssi,payload_hex`.
//! `rssi` may be empty. The payload may contain spaces or `:` separators.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use keg_traits::{FrameSource, RawFrame};

use crate::error::{Result, SimError};

pub const CAPTURE_HEADER: [&str; 4] = ["received_ms", "address", "rssi", "payload_hex"];

/// All frames of a capture, served in file order.
#[derive(Debug, Clone)]
pub struct CaptureReplay {
    frames: Vec<RawFrame>,
    next: usize,
    realtime: bool,
    // (wall clock at first frame, its received_ms)
    anchor: Option<(Instant, u64)>,
}

impl CaptureReplay {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let f = File::open(path.as_ref())?;
        Self::from_reader(f)
    }

    pub fn from_reader<R: Read>(rdr: R) -> Result<Self> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(true)
            .comment(Some(b'#'))
            .from_reader(rdr);
        let mut frames = Vec::new();
        for rec in csv.records() {
            let rec = rec.map_err(|e| SimError::Parse {
                line: e.position().map_or(0, csv::Position::line),
                msg: e.to_string(),
            })?;
            let line = rec.position().map_or(0, csv::Position::line);
            frames.push(parse_record(&rec, line)?);
        }
        tracing::debug!(frames = frames.len(), "capture loaded");
        Ok(Self {
            frames,
            next: 0,
            realtime: false,
            anchor: None,
        })
    }

    /// Deliver frames no faster than their recorded spacing.
    pub fn realtime(mut self, on: bool) -> Self {
        self.realtime = on;
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.frames.len() - self.next
    }

    pub fn frames(&self) -> &[RawFrame] {
        &self.frames
    }
}

fn parse_record(rec: &csv::StringRecord, line: u64) -> Result<RawFrame> {
    let field = |i: usize, name: &str| {
        rec.get(i).ok_or_else(|| SimError::Parse {
            line,
            msg: format!("missing column '{name}'"),
        })
    };
    let received_ms = field(0, "received_ms")?
        .parse::<u64>()
        .map_err(|e| SimError::Parse {
            line,
            msg: format!("received_ms: {e}"),
        })?;
    let address = field(1, "address")?;
    if address.is_empty() {
        return Err(SimError::Parse {
            line,
            msg: "empty address".into(),
        });
    }
    let rssi = match field(2, "rssi")? {
        "" => None,
        s => Some(s.parse::<i16>().map_err(|e| SimError::Parse {
            line,
            msg: format!("rssi: {e}"),
        })?),
    };
    let hex_text: String = field(3, "payload_hex")?
        .chars()
        .filter(|c| !matches!(c, ' ' | ':' | '-'))
        .collect();
    let payload = hex::decode(&hex_text).map_err(|e| SimError::BadHex {
        line,
        msg: e.to_string(),
    })?;
    let mut frame = RawFrame::new(address, received_ms, payload);
    frame.rssi = rssi;
    Ok(frame)
}

impl FrameSource for CaptureReplay {
    fn next_frame(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<Option<RawFrame>, Box<dyn std::error::Error + Send + Sync>> {
        let Some(frame) = self.frames.get(self.next) else {
            return Ok(None);
        };
        if self.realtime {
            let (t0, ms0) = *self.anchor.get_or_insert((Instant::now(), frame.received_ms));
            let due = t0 + Duration::from_millis(frame.received_ms.saturating_sub(ms0));
            let wait = due.saturating_duration_since(Instant::now());
            if wait > timeout {
                std::thread::sleep(timeout);
                return Ok(None);
            }
            std::thread::sleep(wait);
        }
        self.next += 1;
        Ok(Some(frame.clone()))
    }

    fn is_exhausted(&self) -> bool {
        self.next >= self.frames.len()
    }
}

/// Appends frames in the capture format; the counterpart of [`CaptureReplay`].
pub struct CaptureWriter<W: Write> {
    csv: csv::Writer<W>,
}

impl CaptureWriter<File> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(File::create(path.as_ref())?)
    }
}

impl<W: Write> CaptureWriter<W> {
    pub fn new(w: W) -> Result<Self> {
        let mut csv = csv::Writer::from_writer(w);
        csv.write_record(CAPTURE_HEADER).map_err(csv_io)?;
        Ok(Self { csv })
    }

    pub fn write(&mut self, frame: &RawFrame) -> Result<()> {
        let rssi = frame.rssi.map(|r| r.to_string()).unwrap_or_default();
        self.csv
            .write_record([
                frame.received_ms.to_string(),
                frame.source_id.clone(),
                rssi,
                hex::encode_upper(&frame.payload),
            ])
            .map_err(csv_io)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.csv.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W> {
        self.csv
            .into_inner()
            .map_err(|e| SimError::Io(std::io::Error::other(e.to_string())))
    }
}

fn csv_io(e: csv::Error) -> SimError {
    SimError::Io(std::io::Error::other(e))
}
