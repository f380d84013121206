//! Frame sources for tests and tooling.

use std::collections::VecDeque;

use keg_traits::{FrameSource, RawFrame};

/// Replays a fixed list of frames, then reports exhaustion.
#[derive(Debug, Default, Clone)]
pub struct VecSource {
    frames: VecDeque<RawFrame>,
}

impl VecSource {
    pub fn new(frames: impl IntoIterator<Item = RawFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    /// Same payload from one source, `n` times, 100 ms apart.
    pub fn repeat(source_id: &str, payload: &[u8], n: usize) -> Self {
        Self::new((0..n).map(|i| {
            RawFrame::new(source_id, (i as u64) * 100, payload.to_vec())
        }))
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for VecSource {
    fn next_frame(
        &mut self,
        _timeout: std::time::Duration,
    ) -> Result<Option<RawFrame>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.frames.pop_front())
    }

    fn is_exhausted(&self) -> bool {
        self.frames.is_empty()
    }
}

/// A source that always errors; exercises the skip-and-continue path.
#[derive(Debug, Default)]
pub struct FailingSource {
    pub calls: usize,
    pub limit: usize,
}

impl FrameSource for FailingSource {
    fn next_frame(
        &mut self,
        _timeout: std::time::Duration,
    ) -> Result<Option<RawFrame>, Box<dyn std::error::Error + Send + Sync>> {
        self.calls += 1;
        Err(Box::new(std::io::Error::other("radio unavailable")))
    }

    fn is_exhausted(&self) -> bool {
        self.calls >= self.limit
    }
}
