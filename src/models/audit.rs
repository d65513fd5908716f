//! Audit and notification records written as fire-and-forget side effects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Client,
    Supplier,
    Admin,
    System,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Client => "client",
            ActorRole::Supplier => "supplier",
            ActorRole::Admin => "admin",
            ActorRole::System => "system",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "client" => Some(ActorRole::Client),
            "supplier" => Some(ActorRole::Supplier),
            "admin" => Some(ActorRole::Admin),
            "system" => Some(ActorRole::System),
            _ => None,
        }
    }

    /// `role:userId` reference recorded on escrow mutations.
    pub fn actor_ref(&self, user_id: &str) -> String {
        format!("{}:{}", self.as_str(), user_id)
    }
}

/// Append-only audit log entry. Never read back by the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub category: String,
    pub event_type: String,
    pub user_id: String,
    pub resource_id: String,
    pub previous_value: Option<JsonValue>,
    pub new_value: Option<JsonValue>,
    pub metadata: JsonValue,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn booking(
        event_type: &str,
        user_id: &str,
        booking_id: &str,
        previous: &str,
        next: &str,
        metadata: JsonValue,
    ) -> Self {
        Self {
            category: "booking".to_string(),
            event_type: event_type.to_string(),
            user_id: user_id.to_string(),
            resource_id: booking_id.to_string(),
            previous_value: Some(serde_json::json!({ "status": previous })),
            new_value: Some(serde_json::json!({ "status": next })),
            metadata,
            timestamp: Utc::now(),
        }
    }
}

/// Notification handed to the external delivery pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub recipient_id: String,
    pub recipient_role: ActorRole,
    pub kind: String,
    pub booking_id: Option<String>,
    pub data: JsonValue,
    pub created_at: DateTime<Utc>,
}
