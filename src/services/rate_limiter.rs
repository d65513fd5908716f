//! Per-(scope, action) request counters guarding mutation endpoints.
//!
//! The counter store is advanced atomically; if it cannot be reached the
//! limiter fails open and lets the request through.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::database::repository::RateLimitRepository;
use crate::error::{AppError, AppErrorKind, AppResult, ExternalError};

pub mod actions {
    pub const BOOKING_CREATE: &str = "booking_create";
    pub const PAYMENT_INTENT: &str = "payment_intent";
    pub const REVIEW: &str = "review";
    pub const MESSAGE: &str = "message";
    pub const SUPPORT_TICKET: &str = "support_ticket";
    pub const ADMIN_BROADCAST: &str = "admin_broadcast";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u32,
    pub window_secs: i64,
}

impl RateLimit {
    pub const fn new(limit: u32, window_secs: i64) -> Self {
        Self { limit, window_secs }
    }

    /// Built-in limit for an action; unknown actions get the generic one.
    pub fn for_action(action: &str) -> Self {
        match action {
            actions::BOOKING_CREATE => Self::new(10, 3600),
            actions::PAYMENT_INTENT => Self::new(20, 3600),
            actions::REVIEW => Self::new(5, 86_400),
            actions::MESSAGE => Self::new(60, 60),
            actions::SUPPORT_TICKET => Self::new(5, 3600),
            actions::ADMIN_BROADCAST => Self::new(3, 3600),
            _ => Self::new(100, 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub retry_after_seconds: Option<u64>,
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitRepository>,
    overrides: HashMap<String, RateLimit>,
}

pub fn counter_key(scope: &str, action: &str) -> String {
    format!("{}:{}", scope, action)
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitRepository>) -> Self {
        Self {
            store,
            overrides: HashMap::new(),
        }
    }

    pub fn with_limit(mut self, action: &str, limit: RateLimit) -> Self {
        self.overrides.insert(action.to_string(), limit);
        self
    }

    pub fn limit_for(&self, action: &str) -> RateLimit {
        self.overrides
            .get(action)
            .copied()
            .unwrap_or_else(|| RateLimit::for_action(action))
    }

    pub async fn check(&self, scope: &str, action: &str) -> RateLimitDecision {
        self.check_at(scope, action, Utc::now()).await
    }

    pub async fn check_at(&self, scope: &str, action: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let limit = self.limit_for(action);
        let window = Duration::seconds(limit.window_secs);

        match self.store.increment(&counter_key(scope, action), window, now).await {
            Ok(record) => {
                let allowed = record.count <= limit.limit;
                let retry_after_seconds = if allowed {
                    None
                } else {
                    Some((record.expires_at - now).num_seconds().max(1) as u64)
                };
                RateLimitDecision {
                    allowed,
                    remaining: limit.limit.saturating_sub(record.count),
                    reset_at: record.expires_at,
                    retry_after_seconds,
                }
            }
            Err(e) => {
                warn!(scope = %scope, action = %action, error = %e, "rate limit store unavailable, allowing request");
                RateLimitDecision {
                    allowed: true,
                    remaining: limit.limit,
                    reset_at: now + window,
                    retry_after_seconds: None,
                }
            }
        }
    }

    /// Fails with `resource-exhausted` and a retry hint once over the limit.
    pub async fn enforce(&self, scope: &str, action: &str) -> AppResult<RateLimitDecision> {
        let decision = self.check(scope, action).await;
        if decision.allowed {
            return Ok(decision);
        }
        warn!(scope = %scope, action = %action, retry_after = ?decision.retry_after_seconds, "rate limit exceeded");
        Err(AppError::new(AppErrorKind::External(ExternalError::RateLimit {
            action: action.to_string(),
            retry_after: decision.retry_after_seconds,
        })))
    }

    /// Drops counters whose window closed before `now`.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>, batch_limit: i64) -> AppResult<u64> {
        let deleted = self.store.delete_expired(now, batch_limit).await?;
        if deleted > 0 {
            info!(deleted, "expired rate limit windows removed");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::error::{DatabaseError, DatabaseErrorKind};
    use crate::database::memory::InMemoryStore;
    use crate::database::repository::DbResult;
    use crate::error::ErrorCode;
    use crate::models::RateLimitRecord;
    use async_trait::async_trait;

    struct DownStore;

    #[async_trait]
    impl RateLimitRepository for DownStore {
        async fn increment(&self, _: &str, _: Duration, _: DateTime<Utc>) -> DbResult<RateLimitRecord> {
            Err(DatabaseError::new(DatabaseErrorKind::Connection {
                message: "connection refused".to_string(),
            }))
        }

        async fn delete_expired(&self, _: DateTime<Utc>, _: i64) -> DbResult<u64> {
            Ok(0)
        }
    }

    #[test]
    fn unknown_actions_use_generic_limit() {
        assert_eq!(RateLimit::for_action("payment_intent"), RateLimit::new(20, 3600));
        assert_eq!(RateLimit::for_action("something_else"), RateLimit::new(100, 60));
    }

    #[tokio::test]
    async fn blocks_after_limit_until_window_resets() {
        let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()))
            .with_limit("message", RateLimit::new(2, 60));
        let now = Utc::now();

        assert!(limiter.check_at("user-1", "message", now).await.allowed);
        let second = limiter.check_at("user-1", "message", now).await;
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);

        let third = limiter.check_at("user-1", "message", now).await;
        assert!(!third.allowed);
        assert_eq!(third.retry_after_seconds, Some(60));

        // Other scopes have their own counter.
        assert!(limiter.check_at("user-2", "message", now).await.allowed);

        let later = now + Duration::seconds(61);
        assert!(limiter.check_at("user-1", "message", later).await.allowed);
    }

    #[tokio::test]
    async fn fails_open_when_store_is_down() {
        let limiter = RateLimiter::new(Arc::new(DownStore));
        let decision = limiter.check("user-1", "booking_create").await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 10);
        assert!(limiter.enforce("user-1", "booking_create").await.is_ok());
    }

    #[tokio::test]
    async fn enforce_reports_retry_after() {
        let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()))
            .with_limit("review", RateLimit::new(1, 120));
        limiter.enforce("user-1", "review").await.unwrap();

        let err = limiter.enforce("user-1", "review").await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ResourceExhausted);
        assert!(err.retry_after().is_some());
    }
}
