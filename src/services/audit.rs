//! Append-only audit trail. Writes are post-commit effects; a failed write is
//! returned to the effect runner, which logs it.

use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::debug;

use crate::database::repository::AuditRepository;
use crate::error::AppResult;
use crate::models::{AuditEntry, Booking, BookingStatus};

#[derive(Clone)]
pub struct AuditLogger {
    repo: Arc<dyn AuditRepository>,
}

impl AuditLogger {
    pub fn new(repo: Arc<dyn AuditRepository>) -> Self {
        Self { repo }
    }

    pub async fn record(&self, entry: AuditEntry) -> AppResult<()> {
        debug!(
            category = %entry.category,
            event_type = %entry.event_type,
            resource_id = %entry.resource_id,
            "audit entry"
        );
        self.repo.record(&entry).await?;
        Ok(())
    }

    pub async fn booking_transition(
        &self,
        event_type: &str,
        user_id: &str,
        booking: &Booking,
        previous: BookingStatus,
        metadata: JsonValue,
    ) -> AppResult<()> {
        self.record(AuditEntry::booking(
            event_type,
            user_id,
            &booking.id,
            previous.as_str(),
            booking.status.as_str(),
            metadata,
        ))
        .await
    }
}
