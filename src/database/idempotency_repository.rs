use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{ClaimOutcome, DbResult, IdempotencyRepository};
use crate::models::{IdempotencyRecord, IdempotencyStatus};

const IDEMPOTENCY_COLUMNS: &str =
    "key, operation, status, result, error, created_at, updated_at, expires_at";

/// Attempts before giving up on a key that keeps vanishing under cleanup.
const CLAIM_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, FromRow)]
struct IdempotencyRow {
    key: String,
    operation: String,
    status: String,
    result: Option<JsonValue>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<IdempotencyRow> for IdempotencyRecord {
    type Error = DatabaseError;

    fn try_from(row: IdempotencyRow) -> Result<Self, Self::Error> {
        let status = IdempotencyStatus::from_db_status(&row.status).ok_or_else(|| {
            DatabaseError::decode(format!("idempotency key {} has status '{}'", row.key, row.status))
        })?;
        Ok(IdempotencyRecord {
            key: row.key,
            operation: row.operation,
            status,
            result: row.result,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
        })
    }
}

pub struct PgIdempotencyRepository {
    pool: PgPool,
}

impl PgIdempotencyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyRepository for PgIdempotencyRepository {
    async fn try_claim(
        &self,
        record: &IdempotencyRecord,
        now: DateTime<Utc>,
    ) -> DbResult<ClaimOutcome> {
        for _ in 0..CLAIM_ATTEMPTS {
            // The conditional upsert only overwrites a reclaimable row, so
            // exactly one concurrent caller sees its own row come back.
            let claimed = sqlx::query_as::<_, IdempotencyRow>(&format!(
                "INSERT INTO idempotency_keys ({cols}) \
                 VALUES ($1, $2, $3, NULL, NULL, $4, $4, $5) \
                 ON CONFLICT (key) DO UPDATE \
                 SET operation = EXCLUDED.operation, status = EXCLUDED.status, \
                     result = NULL, error = NULL, created_at = EXCLUDED.created_at, \
                     updated_at = EXCLUDED.updated_at, expires_at = EXCLUDED.expires_at \
                 WHERE idempotency_keys.expires_at <= $6 \
                    OR idempotency_keys.status = 'failed' \
                 RETURNING {cols}",
                cols = IDEMPOTENCY_COLUMNS
            ))
            .bind(&record.key)
            .bind(&record.operation)
            .bind(record.status.as_str())
            .bind(record.created_at)
            .bind(record.expires_at)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            if let Some(row) = claimed {
                return Ok(ClaimOutcome::Claimed(row.try_into()?));
            }
            if let Some(existing) = self.get(&record.key).await? {
                return Ok(ClaimOutcome::Existing(existing));
            }
        }

        Err(DatabaseError::new(DatabaseErrorKind::Unknown {
            message: format!("could not claim idempotency key {}", record.key),
        }))
    }

    async fn get(&self, key: &str) -> DbResult<Option<IdempotencyRecord>> {
        sqlx::query_as::<_, IdempotencyRow>(&format!(
            "SELECT {} FROM idempotency_keys WHERE key = $1",
            IDEMPOTENCY_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(IdempotencyRecord::try_from)
        .transpose()
    }

    async fn complete(
        &self,
        key: &str,
        result: Option<JsonValue>,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE idempotency_keys SET status = 'completed', result = $2, error = NULL, \
             updated_at = $3 WHERE key = $1",
        )
        .bind(key)
        .bind(result)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn fail(&self, key: &str, error: &str, now: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            "UPDATE idempotency_keys SET status = 'failed', error = $2, updated_at = $3 \
             WHERE key = $1",
        )
        .bind(key)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>, limit: i64) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM idempotency_keys WHERE key IN \
             (SELECT key FROM idempotency_keys WHERE expires_at <= $1 LIMIT $2)",
        )
        .bind(now)
        .bind(limit)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected())
    }
}
