//! Rate limiting for sensitive operations.
//!
//! Fixed-window counters keyed by `(operation class, actor)`. The counter map
//! is in-memory and process-local; it is never persisted and resets on
//! restart. Multi-instance deployments would need an external counter store
//! with an atomic increment-with-expiry primitive.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

use crate::error::RateLimitError;

/// A per-class request budget.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub limit: u32,
    pub window: Duration,
}

/// Budgets for each operation class.
pub mod limits {
    use super::RateLimit;
    use std::time::Duration;

    pub const BALANCE: RateLimit = RateLimit {
        limit: 5,
        window: Duration::from_secs(60),
    };
    pub const TRANSFER: RateLimit = RateLimit {
        limit: 10,
        window: Duration::from_secs(60 * 60),
    };
    pub const GLOBAL: RateLimit = RateLimit {
        limit: 50,
        window: Duration::from_secs(60 * 60),
    };
    /// HTTP gateway requests, keyed by session header or peer address.
    pub const API: RateLimit = RateLimit {
        limit: 60,
        window: Duration::from_secs(60),
    };
}

struct Counter {
    count: u32,
    reset_at: i64,
}

/// Fixed-window rate limiter.
///
/// The check-and-increment is a single critical section per key, so
/// concurrent callers cannot lose updates or observe a half-reset window.
#[derive(Default)]
pub struct RateLimiter {
    counters: Mutex<HashMap<String, Counter>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check and consume one request for `key`.
    ///
    /// A fresh or elapsed window is reinitialized with count 1 and allowed.
    /// At or above the limit the counter is left untouched, so repeated
    /// denials do not extend the window.
    pub fn check(
        &self,
        key: &str,
        limit: RateLimit,
        label: &'static str,
    ) -> Result<(), RateLimitError> {
        self.check_at(key, limit, label, Utc::now().timestamp_millis())
    }

    fn check_at(
        &self,
        key: &str,
        limit: RateLimit,
        label: &'static str,
        now_ms: i64,
    ) -> Result<(), RateLimitError> {
        let mut counters = self.counters.lock().expect("rate limiter mutex poisoned");

        match counters.get_mut(key) {
            Some(counter) if counter.reset_at >= now_ms => {
                if counter.count >= limit.limit {
                    tracing::warn!(key, label, "rate limit exceeded");
                    return Err(RateLimitError::Exceeded { label });
                }
                counter.count += 1;
                Ok(())
            }
            _ => {
                counters.insert(
                    key.to_string(),
                    Counter {
                        count: 1,
                        reset_at: now_ms + limit.window.as_millis() as i64,
                    },
                );
                Ok(())
            }
        }
    }
}

/// Build the counter key for an operation class and actor.
pub fn limit_key(class: &str, actor: &str) -> String {
    format!("{class}:{actor}")
}
