//! Per-key spacing of outbound requests
//!
//! A keyed spacer: successive acquisitions for the same key are separated by
//! at least the key's minimum delay. Acquisitions for different keys are
//! independent.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Keyed minimum-gap limiter.
///
/// The map stores the earliest instant the *next* request for a key may run.
/// An acquirer reserves its slot under the lock (advancing the stamp past its
/// own wake time), then sleeps outside the lock, so concurrent acquirers for
/// one key serialize without blocking other keys.
pub struct RateLimiter {
    next_allowed: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            next_allowed: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until a request for `key` is allowed, spacing requests by
    /// `min_delay`.
    pub async fn acquire(&self, key: &str, min_delay: Duration) {
        let wake_at = {
            let mut slots = self.next_allowed.lock();
            let now = Instant::now();
            let wake_at = match slots.get(key) {
                Some(&at) if at > now => at,
                _ => now,
            };
            slots.insert(key.to_string(), wake_at + min_delay);
            wake_at
        };

        tokio::time::sleep_until(wake_at).await;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
