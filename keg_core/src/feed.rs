//! Background frame delivery.
//!
//! A `FrameFeed` spawns one thread that owns the `FrameSource` and forwards
//! frames through a bounded channel with `try_send`, so a slow consumer never
//! blocks the source. Frames that do not fit are counted and dropped. The
//! thread is shut down and joined when the feed is dropped.
use crossbeam_channel as xch;
use keg_traits::clock::Clock;
use keg_traits::{FrameSource, RawFrame};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::KegError;
use crate::source_error::map_source_error;

#[derive(Default)]
struct Counters {
    last_ok_ms: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
}

pub struct FrameFeed {
    rx: xch::Receiver<RawFrame>,
    counters: Arc<Counters>,
    epoch: Instant,
    finished: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl FrameFeed {
    /// Spawn the delivery thread. `poll` bounds each `next_frame` call, and
    /// therefore how long shutdown can take.
    pub fn spawn<S, C>(mut source: S, capacity: usize, poll: Duration, clock: C) -> Self
    where
        S: FrameSource + Send + 'static,
        C: Clock + Send + Sync + 'static,
    {
        let (tx, rx) = xch::bounded(capacity.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_t = shutdown.clone();
        let finished = Arc::new(AtomicBool::new(false));
        let finished_t = finished.clone();
        let counters = Arc::new(Counters::default());
        let counters_t = counters.clone();
        let epoch = clock.now();

        let join_handle = std::thread::spawn(move || {
            while !shutdown_t.load(Ordering::Relaxed) {
                match source.next_frame(poll) {
                    Ok(Some(frame)) => match tx.try_send(frame) {
                        Ok(()) => {
                            counters_t
                                .last_ok_ms
                                .store(clock.ms_since(epoch), Ordering::Relaxed);
                        }
                        Err(xch::TrySendError::Full(frame)) => {
                            let n = counters_t.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                            if n.is_power_of_two() {
                                tracing::warn!(
                                    source = %frame.source_id,
                                    dropped = n,
                                    "consumer behind; dropping frames"
                                );
                            }
                        }
                        Err(xch::TrySendError::Disconnected(_)) => {
                            tracing::debug!("feed consumer disconnected, exiting thread");
                            break;
                        }
                    },
                    Ok(None) => {
                        if source.is_exhausted() {
                            tracing::debug!("frame source exhausted");
                            break;
                        }
                    }
                    Err(e) => match map_source_error(&*e) {
                        KegError::SourceTimeout => {}
                        other => {
                            counters_t.errors.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(error = %other, "frame source error; continuing");
                            if source.is_exhausted() {
                                break;
                            }
                        }
                    },
                }
            }
            finished_t.store(true, Ordering::Release);
            tracing::trace!("feed thread exiting cleanly");
        });

        Self {
            rx,
            counters,
            epoch,
            finished,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Next frame, waiting up to `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<RawFrame> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Frames already queued, without waiting.
    pub fn drain(&self) -> impl Iterator<Item = RawFrame> + '_ {
        self.rx.try_iter()
    }

    /// The thread has stopped and every frame it sent was consumed.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire) && self.rx.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.counters.errors.load(Ordering::Relaxed)
    }

    /// Milliseconds since the last delivered frame, against `now_ms` on the feed's clock.
    pub fn stalled_for(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.counters.last_ok_ms.load(Ordering::Relaxed))
    }

    /// `stalled_for` using a real monotonic clock.
    pub fn stalled_for_now(&self) -> u64 {
        let ms = Instant::now().saturating_duration_since(self.epoch).as_millis();
        self.stalled_for(u64::try_from(ms).unwrap_or(u64::MAX))
    }
}

impl Drop for FrameFeed {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // The thread exits after its current next_frame call (bounded by `poll`).
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("feed thread joined"),
                Err(e) => tracing::warn!(?e, "feed thread panicked during shutdown"),
            }
        }
    }
}
