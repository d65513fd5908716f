//! Rate-limit counters in Redis.
//!
//! One Lua script increments the counter and arms its expiry in a single
//! round trip, so concurrent callers can never both observe a fresh window.
//! Expired windows disappear through Redis TTLs; the cleanup sweep has
//! nothing to delete here.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::Script;
use tracing::debug;

use super::error::CacheError;
use super::keys::rate_limit::CounterKey;
use super::RedisPool;
use crate::database::repository::{DbResult, RateLimitRepository};
use crate::models::RateLimitRecord;

const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if count == 1 or ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

pub struct RedisRateLimitStore {
    pool: RedisPool,
    script: Script,
}

impl RedisRateLimitStore {
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            script: Script::new(INCREMENT_SCRIPT),
        }
    }
}

fn record_from(count: i64, ttl_ms: i64, window: Duration, now: DateTime<Utc>) -> RateLimitRecord {
    let remaining = Duration::milliseconds(ttl_ms.max(0));
    let expires_at = now + remaining;
    RateLimitRecord {
        count: count.clamp(0, u32::MAX as i64) as u32,
        window_start: expires_at - window,
        expires_at,
    }
}

#[async_trait]
impl RateLimitRepository for RedisRateLimitStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> DbResult<RateLimitRecord> {
        let mut conn = self.pool.get().await.map_err(CacheError::from)?;
        let redis_key = CounterKey::new(key).to_string();
        let (count, ttl_ms): (i64, i64) = self
            .script
            .key(&redis_key)
            .arg(window.num_milliseconds().max(1))
            .invoke_async(&mut *conn)
            .await
            .map_err(CacheError::from)?;

        debug!(key = %redis_key, count, ttl_ms, "rate limit counter advanced");
        Ok(record_from(count, ttl_ms, window, now))
    }

    async fn delete_expired(&self, _now: DateTime<Utc>, _limit: i64) -> DbResult<u64> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_reconstructs_window_from_ttl() {
        let now = Utc::now();
        let window = Duration::seconds(60);
        let record = record_from(3, 45_000, window, now);
        assert_eq!(record.count, 3);
        assert_eq!(record.expires_at, now + Duration::seconds(45));
        assert_eq!(record.window_start, now - Duration::seconds(15));
    }
}
