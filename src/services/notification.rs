use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::info;

use crate::database::repository::NotificationRepository;
use crate::error::AppResult;
use crate::models::{new_id, ActorRole, Booking, NotificationRecord};
use crate::services::feature_flags::{Feature, FeatureFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    BookingConfirmed,
    BookingCancelled,
    ServiceStarted,
    BookingCompleted,
    DisputeOpened,
    DisputeResolved,
    PaymentReceived,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::BookingConfirmed => "booking_confirmed",
            NotificationType::BookingCancelled => "booking_cancelled",
            NotificationType::ServiceStarted => "service_started",
            NotificationType::BookingCompleted => "booking_completed",
            NotificationType::DisputeOpened => "dispute_opened",
            NotificationType::DisputeResolved => "dispute_resolved",
            NotificationType::PaymentReceived => "payment_received",
        }
    }
}

/// Writes notification records for the external delivery pipeline.
#[derive(Clone)]
pub struct NotificationService {
    repo: Arc<dyn NotificationRepository>,
    flags: Arc<FeatureFlags>,
}

impl NotificationService {
    pub fn new(repo: Arc<dyn NotificationRepository>, flags: Arc<FeatureFlags>) -> Self {
        Self { repo, flags }
    }

    pub async fn send_notification(
        &self,
        recipient_id: &str,
        recipient_role: ActorRole,
        notification_type: NotificationType,
        booking_id: Option<&str>,
        data: JsonValue,
    ) -> AppResult<()> {
        if !self.flags.is_enabled(Feature::Notifications).await {
            info!(
                kind = notification_type.as_str(),
                recipient_id = %recipient_id,
                "notifications disabled, dropping"
            );
            return Ok(());
        }

        let record = NotificationRecord {
            id: new_id(),
            recipient_id: recipient_id.to_string(),
            recipient_role,
            kind: notification_type.as_str().to_string(),
            booking_id: booking_id.map(str::to_string),
            data,
            created_at: Utc::now(),
        };
        self.repo.insert(&record).await?;
        info!(
            kind = notification_type.as_str(),
            recipient_id = %recipient_id,
            recipient_role = recipient_role.as_str(),
            "notification queued"
        );
        Ok(())
    }

    /// Notifies the other side of the booking from `actor`'s point of view.
    /// Supplier notifications are addressed to the supplier profile.
    pub async fn notify_counterparty(
        &self,
        booking: &Booking,
        actor: ActorRole,
        notification_type: NotificationType,
        data: JsonValue,
    ) -> AppResult<()> {
        let (recipient, role) = match actor {
            ActorRole::Client => (booking.supplier_id.as_str(), ActorRole::Supplier),
            ActorRole::Supplier | ActorRole::Admin | ActorRole::System => {
                (booking.client_id.as_str(), ActorRole::Client)
            }
        };
        self.send_notification(recipient, role, notification_type, Some(&booking.id), data)
            .await
    }
}
