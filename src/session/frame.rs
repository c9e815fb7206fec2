//! The unit of capture: one timestamped block of PCM samples.

use std::sync::Arc;
use std::time::Duration;

use crate::audio::capture::PcmChunk;
use crate::session::state::ChannelRole;

/// A fixed block of interleaved samples with a monotonic sequence number
/// and a capture timestamp on the session clock. Immutable once
/// produced; the sample payload is shared between the writer and the
/// synchronizer without copying.
#[derive(Debug, Clone)]
pub struct Frame {
    pub role: ChannelRole,
    pub seq: u64,
    /// Pause-adjusted time on the session clock.
    pub timestamp: Duration,
    pub samples: Arc<[f32]>,
    pub channels: u16,
}

impl Frame {
    pub fn new(role: ChannelRole, seq: u64, timestamp: Duration, chunk: PcmChunk) -> Self {
        Self {
            role,
            seq,
            timestamp,
            samples: chunk.samples.into(),
            channels: chunk.channels,
        }
    }

    /// Number of sample frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}
