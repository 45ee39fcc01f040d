//! Sliding-window rate limiting
//!
//! Every call records the request first and then counts what is left in the
//! trailing window, so the current request is part of its own count. A
//! request is admitted iff that count is at most the limit. Rejected requests
//! are recorded too: a client that keeps hammering stays throttled until it
//! backs off for a full window.
//!
//! Two backends sit behind [`RateLimiter`]: [`LocalRateLimiter`] for a single
//! process and [`RedisRateLimiter`] for a shared store. The pipeline never
//! knows which one it has.

pub mod local;
pub mod redis;

pub use local::LocalRateLimiter;
pub use redis::RedisRateLimiter;

use async_trait::async_trait;
use std::time::Duration;

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request is admitted
    pub permitted: bool,
    /// Requests in the window, this one included
    pub count: u64,
    /// Limit the request was checked against
    pub limit: u64,
}

impl RateDecision {
    pub fn new(count: u64, limit: u64) -> Self {
        Self {
            permitted: count <= limit,
            count,
            limit,
        }
    }

    /// Requests left in the current window
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }
}

/// Admission check keyed by an arbitrary string (client identity + route).
///
/// Never fails: backend trouble is handled inside the implementation.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn allow(&self, key: &str, limit: u64, window: Duration) -> RateDecision;
}

/// Window entries worth keeping for a given limit.
///
/// Only the newest `limit + 1` timestamps can influence a decision: once that
/// many are inside the window the request is rejected no matter how many
/// older ones sit behind them.
pub(crate) fn retained_entries(limit: u64) -> usize {
    usize::try_from(limit).unwrap_or(usize::MAX).saturating_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_at_limit_is_permitted() {
        let decision = RateDecision::new(5, 5);
        assert!(decision.permitted);
        assert_eq!(decision.remaining(), 0);
    }

    #[test]
    fn test_decision_over_limit_is_rejected() {
        let decision = RateDecision::new(6, 5);
        assert!(!decision.permitted);
        assert_eq!(decision.remaining(), 0);
    }

    #[test]
    fn test_remaining() {
        assert_eq!(RateDecision::new(1, 100).remaining(), 99);
    }

    #[test]
    fn test_retained_entries() {
        assert_eq!(retained_entries(0), 1);
        assert_eq!(retained_entries(100), 101);
        assert_eq!(retained_entries(u64::MAX), usize::MAX);
    }
}
