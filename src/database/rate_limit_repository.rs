use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool};

use crate::database::error::DatabaseError;
use crate::database::repository::{DbResult, RateLimitRepository};
use crate::models::RateLimitRecord;

#[derive(Debug, Clone, FromRow)]
struct RateLimitRow {
    count: i32,
    window_start: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

pub struct PgRateLimitRepository {
    pool: PgPool,
}

impl PgRateLimitRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimitRepository for PgRateLimitRepository {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> DbResult<RateLimitRecord> {
        let row = sqlx::query_as::<_, RateLimitRow>(
            "INSERT INTO rate_limits (key, count, window_start, expires_at) \
             VALUES ($1, 1, $2, $3) \
             ON CONFLICT (key) DO UPDATE SET \
                 count = CASE WHEN rate_limits.expires_at <= $2 THEN 1 \
                              ELSE rate_limits.count + 1 END, \
                 window_start = CASE WHEN rate_limits.expires_at <= $2 THEN $2 \
                                     ELSE rate_limits.window_start END, \
                 expires_at = CASE WHEN rate_limits.expires_at <= $2 THEN $3 \
                                   ELSE rate_limits.expires_at END \
             RETURNING count, window_start, expires_at",
        )
        .bind(key)
        .bind(now)
        .bind(now + window)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(RateLimitRecord {
            count: row.count.max(0) as u32,
            window_start: row.window_start,
            expires_at: row.expires_at,
        })
    }

    async fn delete_expired(&self, now: DateTime<Utc>, limit: i64) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM rate_limits WHERE key IN \
             (SELECT key FROM rate_limits WHERE expires_at <= $1 LIMIT $2)",
        )
        .bind(now)
        .bind(limit)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected())
    }
}
