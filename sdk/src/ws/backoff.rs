//! Linear reconnect backoff.
//!
//! Plain data, no timers: the client asks for the next delay and sleeps on
//! its own.

use std::time::Duration;

/// Linear backoff with a fixed attempt cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl Backoff {
    /// Creates a backoff with the given base delay and attempt cap.
    #[must_use]
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempts: 0,
        }
    }

    /// Records an attempt and returns its delay, or `None` once the cap is hit.
    ///
    /// Attempt `n` (1-based) waits `n * base`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(self.base.saturating_mul(self.attempts))
    }

    /// Clears the attempt counter.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts recorded since the last reset.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns true once no further attempts are allowed.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_linear() {
        let mut backoff = Backoff::new(Duration::from_secs(1), 3);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(3)));
        assert_eq!(backoff.next_delay(), None);
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(10), 1);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        backoff.reset();
        assert!(!backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_backoff_zero_attempts() {
        let mut backoff = Backoff::new(Duration::from_secs(1), 0);
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), None);
    }
}
