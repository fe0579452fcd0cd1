//! Submission throttle and send-error counter.

use std::time::Duration;

use tokio::time::Instant;

/// Minimum spacing between accepted submissions.
#[derive(Debug, Clone)]
pub struct ThrottleState {
    interval: Duration,
    last_accepted: Option<Instant>,
}

impl ThrottleState {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_accepted: None,
        }
    }

    /// Accept a submission at `now` and record it, or return the time since
    /// the last accepted one. A rejected call changes nothing.
    pub fn try_accept(&mut self, now: Instant) -> Result<(), Duration> {
        if let Some(last) = self.last_accepted {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.interval {
                return Err(elapsed);
            }
        }
        self.last_accepted = Some(now);
        Ok(())
    }

    pub fn last_accepted(&self) -> Option<Instant> {
        self.last_accepted
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Send failures since the last reset.
#[derive(Debug, Clone, Default)]
pub struct ErrorCounter {
    count: u32,
    last_failure: Option<Instant>,
}

impl ErrorCounter {
    /// Record one failure and return the new count.
    pub fn record_failure(&mut self, now: Instant) -> u32 {
        self.count = self.count.saturating_add(1);
        self.last_failure = Some(now);
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }
}
