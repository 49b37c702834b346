//! Sliding-window handshake rate limiter.
//!
//! Keeps a log of recent attempt instants per key. Keys are free-form; the
//! gateway uses `ip:<addr>` before verification and `id:<identity>` after.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Per-key sliding-window limiter.
#[derive(Debug)]
pub struct ConnectRateLimiter {
    max_attempts: u32,
    window: Duration,
    attempts: DashMap<String, VecDeque<Instant>>,
}

impl ConnectRateLimiter {
    /// Allows `max_attempts` per `window` for each key. `max_attempts == 0`
    /// disables limiting.
    #[must_use]
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            attempts: DashMap::new(),
        }
    }

    /// Records an attempt for `key` now.
    ///
    /// # Errors
    ///
    /// Returns the time until the oldest logged attempt leaves the window
    /// if the key is over its limit. Rejected attempts are not logged.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        self.check_at(key, Instant::now())
    }

    /// [`check`](Self::check) against an explicit clock reading.
    ///
    /// # Errors
    ///
    /// Same as [`check`](Self::check).
    pub fn check_at(&self, key: &str, now: Instant) -> Result<(), Duration> {
        if self.max_attempts == 0 {
            return Ok(());
        }

        let mut log = self.attempts.entry(key.to_string()).or_default();
        while log
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
        {
            log.pop_front();
        }

        if log.len() >= self.max_attempts as usize {
            let retry_after = log
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or(self.window);
            return Err(retry_after);
        }

        log.push_back(now);
        Ok(())
    }

    /// Drops keys whose whole log has aged out. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.attempts.len();
        self.attempts.retain(|_, log| {
            log.back()
                .is_some_and(|t| now.saturating_duration_since(*t) < self.window)
        });
        before.saturating_sub(self.attempts.len())
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.attempts.len()
    }
}
