//! Redis-backed rate limiter
//!
//! Each key is a sorted set of request ids scored by arrival time in
//! milliseconds. A Lua script runs purge, insert, count and expiry refresh as
//! one atomic step, so concurrent requests sharing a key cannot over-admit.

use super::{local::LocalRateLimiter, retained_entries, RateDecision, RateLimiter};
use crate::clock::Clock;
use crate::config::RedisConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use std::sync::Arc;
use std::time::Duration;

const KEY_PREFIX: &str = "portico:ratelimit:";

// KEYS[1] window key
// ARGV[1] cutoff (ms, inclusive), ARGV[2] now (ms), ARGV[3] member,
// ARGV[4] ttl (ms), ARGV[5] entries to keep
const SLIDING_WINDOW_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], 0, ARGV[1])
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[3])
redis.call('ZREMRANGEBYRANK', KEYS[1], 0, -(tonumber(ARGV[5]) + 1))
local count = redis.call('ZCARD', KEYS[1])
redis.call('PEXPIRE', KEYS[1], ARGV[4])
return count
"#;

/// Shared-store limiter.
///
/// When Redis cannot be reached the decision is taken by an in-process
/// [`LocalRateLimiter`] instead, so limiting degrades to per-instance rather
/// than failing open.
#[derive(Clone)]
pub struct RedisRateLimiter {
    conn: ConnectionManager,
    script: Arc<Script>,
    clock: Arc<dyn Clock>,
    fallback: LocalRateLimiter,
}

impl RedisRateLimiter {
    /// Connect to Redis
    pub async fn connect(config: &RedisConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .context("Failed to create Redis client")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        Ok(Self::with_connection(conn, clock))
    }

    pub fn with_connection(conn: ConnectionManager, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn,
            script: Arc::new(Script::new(SLIDING_WINDOW_SCRIPT)),
            fallback: LocalRateLimiter::new(clock.clone()),
            clock,
        }
    }

    async fn allow_shared(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> redis::RedisResult<RateDecision> {
        let now = self.clock.now().timestamp_millis();
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let member = format!("{}:{}", now, uuid::Uuid::new_v4());
        let keep = retained_entries(limit);

        let mut conn = self.conn.clone();
        let count: u64 = self
            .script
            .key(redis_key(key))
            .arg(now.saturating_sub(window_ms))
            .arg(now)
            .arg(member)
            .arg(window_ms.saturating_add(1000))
            .arg(keep as u64)
            .invoke_async(&mut conn)
            .await?;

        Ok(RateDecision::new(count, limit))
    }
}

fn redis_key(key: &str) -> String {
    format!("{}{}", KEY_PREFIX, key)
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn allow(&self, key: &str, limit: u64, window: Duration) -> RateDecision {
        match self.allow_shared(key, limit, window).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    error = %e,
                    "Redis unavailable for rate limiting, using in-memory fallback"
                );
                metrics::counter!("portico_rate_limit_fallback_total").increment(1);
                self.fallback.check(key, limit, window)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_redis_key_is_prefixed() {
        assert_eq!(
            redis_key("127.0.0.1:/api/auth/login"),
            "portico:ratelimit:127.0.0.1:/api/auth/login"
        );
    }

    #[test]
    fn test_script_trims_before_counting() {
        let trim = SLIDING_WINDOW_SCRIPT
            .find("ZREMRANGEBYRANK")
            .unwrap();
        let count = SLIDING_WINDOW_SCRIPT.find("ZCARD").unwrap();
        let purge = SLIDING_WINDOW_SCRIPT.find("ZREMRANGEBYSCORE").unwrap();
        let insert = SLIDING_WINDOW_SCRIPT.find("ZADD").unwrap();
        assert!(purge < insert && insert < trim && trim < count);
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        let config = RedisConfig {
            url: "not-a-redis-url".to_string(),
        };
        let result =
            RedisRateLimiter::connect(&config, Arc::new(crate::clock::SystemClock)).await;
        assert!(result.is_err());
    }

    const WINDOW: Duration = Duration::from_secs(60);

    async fn live_limiter() -> (RedisRateLimiter, ManualClock) {
        let url = std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let clock = ManualClock::at_timestamp(chrono::Utc::now().timestamp());
        let limiter = RedisRateLimiter::connect(&RedisConfig { url }, Arc::new(clock.clone()))
            .await
            .expect("Redis reachable at REDIS_URL");
        (limiter, clock)
    }

    fn fresh_key() -> String {
        format!("test:{}", uuid::Uuid::new_v4())
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn test_script_admits_limit_then_rejects() {
        let (limiter, _) = live_limiter().await;
        let key = fresh_key();

        for i in 1..=3 {
            let decision = limiter.allow_shared(&key, 3, WINDOW).await.unwrap();
            assert!(decision.permitted, "request {i} should pass");
            assert_eq!(decision.count, i);
        }
        let decision = limiter.allow_shared(&key, 3, WINDOW).await.unwrap();
        assert!(!decision.permitted);
        assert_eq!(decision.remaining(), 0);
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn test_script_window_slides() {
        let (limiter, clock) = live_limiter().await;
        let key = fresh_key();

        assert!(limiter.allow_shared(&key, 1, WINDOW).await.unwrap().permitted);
        clock.advance(chrono::Duration::seconds(30));
        assert!(!limiter.allow_shared(&key, 1, WINDOW).await.unwrap().permitted);

        // The admitted stamp expired; the rejected one still counts.
        clock.advance(chrono::Duration::seconds(31));
        assert!(!limiter.allow_shared(&key, 1, WINDOW).await.unwrap().permitted);

        clock.advance(chrono::Duration::seconds(61));
        assert!(limiter.allow_shared(&key, 1, WINDOW).await.unwrap().permitted);
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn test_script_keeps_limit_plus_one_entries() {
        let (limiter, _) = live_limiter().await;
        let key = fresh_key();

        let mut last = None;
        for _ in 0..20 {
            last = Some(limiter.allow_shared(&key, 3, WINDOW).await.unwrap());
        }
        assert_eq!(last.map(|d| d.count), Some(4));
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn test_script_keys_are_independent() {
        let (limiter, _) = live_limiter().await;
        let (a, b) = (fresh_key(), fresh_key());

        assert!(limiter.allow_shared(&a, 1, WINDOW).await.unwrap().permitted);
        assert!(!limiter.allow_shared(&a, 1, WINDOW).await.unwrap().permitted);
        assert!(limiter.allow_shared(&b, 1, WINDOW).await.unwrap().permitted);
    }
}
