use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;

use crate::database::error::DatabaseError;
use crate::database::repository::{DbResult, FeatureFlagRepository};

pub struct PgFeatureFlagRepository {
    pool: PgPool,
}

impl PgFeatureFlagRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeatureFlagRepository for PgFeatureFlagRepository {
    async fn load_all(&self) -> DbResult<HashMap<String, bool>> {
        let rows = sqlx::query_as::<_, (String, bool)>("SELECT name, enabled FROM feature_flags")
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(rows.into_iter().collect())
    }

    async fn set(&self, flag: &str, enabled: bool, updated_by: &str) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO feature_flags (name, enabled, updated_by, updated_at) \
             VALUES ($1, $2, $3, NOW()) \
             ON CONFLICT (name) DO UPDATE \
             SET enabled = EXCLUDED.enabled, updated_by = EXCLUDED.updated_by, updated_at = NOW()",
        )
        .bind(flag)
        .bind(enabled)
        .bind(updated_by)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
