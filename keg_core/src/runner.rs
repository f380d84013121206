//! Frame loop: source -> monitor -> sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use keg_traits::FrameSource;
use keg_traits::clock::MonotonicClock;

use crate::error::{KegError, Result};
use crate::feed::FrameFeed;
use crate::monitor::{Monitor, Reading};
use crate::source_error::map_source_error;

/// Where readings go (console, log file, storage...).
pub trait ReadingSink {
    fn emit(&mut self, reading: &Reading) -> Result<()>;
}

impl<F: FnMut(&Reading) -> Result<()>> ReadingSink for F {
    fn emit(&mut self, reading: &Reading) -> Result<()> {
        self(reading)
    }
}

/// Collects readings in memory.
#[derive(Debug, Default)]
pub struct VecSink(pub Vec<Reading>);

impl ReadingSink for VecSink {
    fn emit(&mut self, reading: &Reading) -> Result<()> {
        self.0.push(reading.clone());
        Ok(())
    }
}

/// How frames reach the monitor.
#[derive(Debug, Clone, Copy)]
pub enum FeedMode {
    /// Poll the source on the calling thread.
    Direct,
    /// Source runs on its own thread behind a bounded queue of this capacity.
    Threaded(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub mode: FeedMode,
    /// Upper bound for one wait on the source.
    pub poll: Duration,
    /// Stop after this many frames were taken from the source.
    pub max_frames: Option<u64>,
    /// Warn once when no frame arrived for this long (threaded mode).
    pub stall_warn_ms: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: FeedMode::Threaded(64),
            poll: Duration::from_millis(100),
            max_frames: None,
            stall_warn_ms: Some(30_000),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub readings: u64,
    /// Frames the source filter ignored.
    pub filtered: u64,
    /// Frames dropped because the consumer fell behind.
    pub dropped: u64,
    pub source_errors: u64,
}

/// Run until `shutdown` is set, the source is exhausted, or `max_frames` is reached.
///
/// Source errors are logged and skipped. Only a sink error ends the run early.
pub fn run<S>(
    source: S,
    monitor: &mut Monitor,
    sink: &mut dyn ReadingSink,
    shutdown: &AtomicBool,
    opts: RunOptions,
) -> Result<RunSummary>
where
    S: FrameSource + Send + 'static,
{
    match opts.mode {
        FeedMode::Direct => run_direct(source, monitor, sink, shutdown, opts),
        FeedMode::Threaded(cap) => run_with_feed(source, cap, monitor, sink, shutdown, opts),
    }
}

fn budget_left(summary: &RunSummary, opts: &RunOptions) -> bool {
    opts.max_frames.is_none_or(|max| summary.frames < max)
}

fn handle(
    frame: &keg_traits::RawFrame,
    monitor: &mut Monitor,
    sink: &mut dyn ReadingSink,
    summary: &mut RunSummary,
) -> Result<()> {
    summary.frames += 1;
    match monitor.process(frame) {
        Some(reading) => {
            summary.readings += 1;
            sink.emit(&reading)
        }
        None => {
            summary.filtered += 1;
            Ok(())
        }
    }
}

fn run_direct<S: FrameSource>(
    mut source: S,
    monitor: &mut Monitor,
    sink: &mut dyn ReadingSink,
    shutdown: &AtomicBool,
    opts: RunOptions,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    while !shutdown.load(Ordering::Relaxed) && budget_left(&summary, &opts) {
        match source.next_frame(opts.poll) {
            Ok(Some(frame)) => handle(&frame, monitor, sink, &mut summary)?,
            Ok(None) if source.is_exhausted() => break,
            Ok(None) => {}
            Err(e) => match map_source_error(&*e) {
                KegError::SourceTimeout => {}
                other => {
                    summary.source_errors += 1;
                    tracing::warn!(error = %other, "frame source error; continuing");
                    if source.is_exhausted() {
                        break;
                    }
                }
            },
        }
    }
    tracing::debug!(?summary, "run finished");
    Ok(summary)
}

fn run_with_feed<S>(
    source: S,
    capacity: usize,
    monitor: &mut Monitor,
    sink: &mut dyn ReadingSink,
    shutdown: &AtomicBool,
    opts: RunOptions,
) -> Result<RunSummary>
where
    S: FrameSource + Send + 'static,
{
    let feed = FrameFeed::spawn(source, capacity, opts.poll, MonotonicClock::new());
    let mut summary = RunSummary::default();
    let mut stall_warned = false;
    while !shutdown.load(Ordering::Relaxed) && budget_left(&summary, &opts) {
        if let Some(frame) = feed.recv_timeout(opts.poll) {
            handle(&frame, monitor, sink, &mut summary)?;
            stall_warned = false;
            continue;
        }
        if feed.is_finished() {
            break;
        }
        if let Some(limit) = opts.stall_warn_ms
            && !stall_warned
            && feed.stalled_for_now() > limit
        {
            tracing::warn!(stalled_ms = feed.stalled_for_now(), "no frames received");
            stall_warned = true;
        }
    }
    summary.dropped = feed.dropped();
    summary.source_errors = feed.errors();
    tracing::debug!(?summary, "run finished");
    Ok(summary)
}
