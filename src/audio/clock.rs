//! Session clock and per-channel pause accounting.
//!
//! All frames in a session are stamped against one shared monotonic
//! epoch. Each channel keeps its own pause ledger and subtracts the time
//! it spent paused, so downstream consumers observe a monotonically
//! non-decreasing timestamp with no discontinuity across resume.

use std::time::{Duration, Instant};

/// Shared monotonic epoch for one session. Cheap to clone.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    epoch: Instant,
}

impl SessionClock {
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Raw elapsed time since the session epoch.
    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// Tracks how long one channel has been paused in total.
#[derive(Debug, Default)]
pub struct PauseLedger {
    paused_total: Duration,
    paused_since: Option<Instant>,
}

impl PauseLedger {
    pub fn pause(&mut self) {
        if self.paused_since.is_none() {
            self.paused_since = Some(Instant::now());
        }
    }

    /// Close the current pause interval and fold it into the offset.
    pub fn resume(&mut self) {
        if let Some(since) = self.paused_since.take() {
            self.paused_total += since.elapsed();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_since.is_some()
    }

    /// Stamp a frame: elapsed session time minus everything this channel
    /// spent paused. Non-decreasing as long as stamps are taken while
    /// the channel is live.
    pub fn stamp(&self, clock: &SessionClock) -> Duration {
        clock.elapsed().saturating_sub(self.offset())
    }

    fn offset(&self) -> Duration {
        match self.paused_since {
            Some(since) => self.paused_total + since.elapsed(),
            None => self.paused_total,
        }
    }
}
