//! Maps `Box<dyn Error>` from the `FrameSource` boundary to typed `KegError`.
//!
//! Known `keg_sim::SimError` values are downcast when the `sim-errors`
//! feature is on; anything else falls back to string heuristics.

use crate::error::KegError;

pub fn map_source_error(e: &(dyn std::error::Error + 'static)) -> KegError {
    #[cfg(feature = "sim-errors")]
    {
        if let Some(sim) = e.downcast_ref::<keg_sim::SimError>() {
            return match sim {
                keg_sim::SimError::Timeout => KegError::SourceTimeout,
                other => KegError::Source(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") || s.to_lowercase().contains("timed out") {
        KegError::SourceTimeout
    } else {
        KegError::Source(s)
    }
}
