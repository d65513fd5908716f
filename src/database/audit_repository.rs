use async_trait::async_trait;
use sqlx::PgPool;

use crate::database::error::DatabaseError;
use crate::database::repository::{AuditRepository, DbResult, NotificationRepository};
use crate::models::{AuditEntry, NotificationRecord};

/// Append-only audit log and notification outbox
pub struct PgAuditRepository {
    pool: PgPool,
}

impl PgAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for PgAuditRepository {
    async fn record(&self, entry: &AuditEntry) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO audit_logs (category, event_type, user_id, resource_id, \
             previous_value, new_value, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&entry.category)
        .bind(&entry.event_type)
        .bind(&entry.user_id)
        .bind(&entry.resource_id)
        .bind(&entry.previous_value)
        .bind(&entry.new_value)
        .bind(&entry.metadata)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}

#[async_trait]
impl NotificationRepository for PgAuditRepository {
    async fn insert(&self, notification: &NotificationRecord) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO notifications (id, recipient_id, recipient_role, kind, booking_id, \
             data, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&notification.id)
        .bind(&notification.recipient_id)
        .bind(notification.recipient_role.as_str())
        .bind(&notification.kind)
        .bind(&notification.booking_id)
        .bind(&notification.data)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
