//! Health score and reconnect bookkeeping.

use serde::{Deserialize, Serialize};

pub const MAX_SCORE: f64 = 100.0;
pub const MIN_SCORE: f64 = 0.0;

/// Link health, always within [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthScore(f64);

impl HealthScore {
    pub fn new() -> Self {
        Self(MAX_SCORE)
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn penalize(&mut self, delta: f64) -> f64 {
        self.adjust(-delta.abs())
    }

    pub fn reward(&mut self, delta: f64) -> f64 {
        self.adjust(delta.abs())
    }

    fn adjust(&mut self, delta: f64) -> f64 {
        let next = self.0 + delta;
        self.0 = if next.is_nan() {
            self.0
        } else {
            next.clamp(MIN_SCORE, MAX_SCORE)
        };
        self.0
    }
}

impl Default for HealthScore {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded reconnect attempts.
///
/// `attempts` only grows through [`ReconnectState::record_failure`], never
/// past `max_attempts`, and returns to zero only on a successful connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectState {
    attempts: u32,
    max_attempts: u32,
}

impl ReconnectState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn can_attempt(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        !self.can_attempt()
    }

    /// Count a failed connect. Returns the attempt number.
    pub fn record_failure(&mut self) -> u32 {
        self.attempts = (self.attempts + 1).min(self.max_attempts);
        self.attempts
    }

    pub fn record_success(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_clamped() {
        let mut score = HealthScore::new();
        assert_eq!(score.reward(20.0), 100.0);
        for _ in 0..15 {
            score.penalize(10.0);
        }
        assert_eq!(score.value(), 0.0);
        assert_eq!(score.reward(20.0), 20.0);
        assert_eq!(score.penalize(f64::NAN), 20.0);
    }

    #[test]
    fn test_reconnect_bounded() {
        let mut state = ReconnectState::new(3);
        assert_eq!(state.record_failure(), 1);
        assert_eq!(state.record_failure(), 2);
        assert!(state.can_attempt());
        assert_eq!(state.record_failure(), 3);
        assert!(state.is_exhausted());
        assert_eq!(state.record_failure(), 3);

        state.record_success();
        assert_eq!(state.attempts(), 0);
        assert!(state.can_attempt());
    }
}
