//! Process-local rate limiter

use super::{retained_entries, RateDecision, RateLimiter};
use crate::clock::{Clock, SystemClock};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Keys tracked before idle windows are swept.
const DEFAULT_MAX_KEYS: usize = 10_000;

/// Minimum spacing between two sweeps, in milliseconds.
const SWEEP_INTERVAL_MS: i64 = 1_000;

/// Shared window for new keys arriving while the map is full.
const OVERFLOW_KEY: &str = "\0overflow";

#[derive(Debug)]
struct Window {
    /// Request timestamps in milliseconds, oldest first
    stamps: VecDeque<i64>,
    window_ms: i64,
}

impl Window {
    fn purge(&mut self, cutoff: i64) {
        while self.stamps.front().is_some_and(|&ts| ts <= cutoff) {
            self.stamps.pop_front();
        }
    }

    fn is_idle(&self, now: i64) -> bool {
        self.stamps
            .back()
            .is_none_or(|&newest| newest <= now - self.window_ms)
    }
}

/// Sliding-window limiter held in memory.
///
/// Windows live in a sharded map, so requests for different keys only contend
/// when they hash to the same shard, and a key's purge/record/count runs under
/// its shard lock.
///
/// Once `max_keys` windows are tracked, idle ones are swept at most once per
/// second. New keys that still find the map full share a single overflow
/// window, so per-call cost never depends on how many keys are live.
#[derive(Clone)]
pub struct LocalRateLimiter {
    windows: Arc<DashMap<String, Window>>,
    clock: Arc<dyn Clock>,
    max_keys: usize,
    next_sweep_ms: Arc<AtomicI64>,
    sweeps: Arc<AtomicU64>,
}

impl Default for LocalRateLimiter {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl LocalRateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            clock,
            max_keys: DEFAULT_MAX_KEYS,
            next_sweep_ms: Arc::new(AtomicI64::new(i64::MIN)),
            sweeps: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Sweeps run so far
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    /// Synchronous admission check, shared with the Redis fallback path.
    pub fn check(&self, key: &str, limit: u64, window: Duration) -> RateDecision {
        let now = self.clock.now().timestamp_millis();
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let keep = retained_entries(limit);

        if self.windows.len() >= self.max_keys {
            self.sweep_idle(now);
        }
        let key = if self.windows.len() >= self.max_keys && !self.windows.contains_key(key) {
            OVERFLOW_KEY
        } else {
            key
        };

        let count = {
            let mut entry = self
                .windows
                .entry(key.to_string())
                .or_insert_with(|| Window {
                    stamps: VecDeque::new(),
                    window_ms,
                });
            let slot = entry.value_mut();
            slot.window_ms = window_ms;
            slot.purge(now.saturating_sub(window_ms));
            slot.stamps.push_back(now);
            while slot.stamps.len() > keep {
                slot.stamps.pop_front();
            }
            slot.stamps.len() as u64
        };

        RateDecision::new(count, limit)
    }

    /// Drop idle windows, unless another caller swept less than
    /// `SWEEP_INTERVAL_MS` ago.
    fn sweep_idle(&self, now: i64) {
        let due = self.next_sweep_ms.load(Ordering::Acquire);
        if now < due {
            return;
        }
        let next = now.saturating_add(SWEEP_INTERVAL_MS);
        if self
            .next_sweep_ms
            .compare_exchange(due, next, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let before = self.windows.len();
        self.windows.retain(|_, w| !w.is_idle(now));
        self.sweeps.fetch_add(1, Ordering::Relaxed);

        let after = self.windows.len();
        if after >= self.max_keys {
            tracing::warn!(
                tracked = after,
                max_keys = self.max_keys,
                "Rate limiter full of active keys, new clients share the overflow window"
            );
        } else {
            tracing::debug!(removed = before - after, tracked = after, "Swept idle rate windows");
        }
    }
}

#[async_trait]
impl RateLimiter for LocalRateLimiter {
    async fn allow(&self, key: &str, limit: u64, window: Duration) -> RateDecision {
        self.check(key, limit, window)
    }
}
