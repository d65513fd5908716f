//! Deduplication ledger for webhook deliveries and state-mutating calls.
//!
//! Storage failures never block the caller: when the ledger cannot be read
//! or written the operation proceeds un-deduplicated and a warning is logged.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::repository::{ClaimOutcome, IdempotencyRepository};
use crate::error::AppResult;
use crate::models::{IdempotencyRecord, IdempotencyStatus};

/// Default lifetime of a ledger entry.
pub const DEFAULT_TTL_SECS: u64 = 86_400;

/// Result of a read-only idempotency check.
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyCheck {
    Proceed,
    /// A completed execution (with its result) or one still in flight.
    Duplicate { previous_result: Option<JsonValue> },
}

impl IdempotencyCheck {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, IdempotencyCheck::Duplicate { .. })
    }
}

/// Result of claiming a key before running an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The caller owns the key and must finish it with
    /// `mark_completed` or `mark_failed`.
    Acquired,
    Duplicate { previous_result: Option<JsonValue> },
    /// The ledger was unreachable; the caller proceeds without a guard.
    Unguarded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Idempotent<T> {
    Executed(T),
    Duplicate(Option<JsonValue>),
}

#[derive(Clone)]
pub struct IdempotencyService {
    repo: Arc<dyn IdempotencyRepository>,
    ttl: Duration,
}

fn duplicate_of(record: &IdempotencyRecord) -> Option<Option<JsonValue>> {
    match record.status {
        IdempotencyStatus::Completed => Some(record.result.clone()),
        // In flight elsewhere: dropping this call is safer than running the
        // side effects twice.
        IdempotencyStatus::Processing => Some(None),
        IdempotencyStatus::Failed => None,
    }
}

impl IdempotencyService {
    pub fn new(repo: Arc<dyn IdempotencyRepository>, ttl_secs: u64) -> Self {
        Self {
            repo,
            ttl: Duration::seconds(ttl_secs.min(i64::MAX as u64) as i64),
        }
    }

    pub async fn check(&self, key: &str, operation: &str) -> IdempotencyCheck {
        self.check_at(key, operation, Utc::now()).await
    }

    pub async fn check_at(&self, key: &str, operation: &str, now: DateTime<Utc>) -> IdempotencyCheck {
        match self.repo.get(key).await {
            Ok(Some(record)) if !record.is_expired(now) => match duplicate_of(&record) {
                Some(previous_result) => {
                    debug!(key = %key, operation = %operation, status = %record.status.as_str(), "duplicate operation");
                    IdempotencyCheck::Duplicate { previous_result }
                }
                None => IdempotencyCheck::Proceed,
            },
            Ok(_) => IdempotencyCheck::Proceed,
            Err(e) => {
                warn!(key = %key, operation = %operation, error = %e, "idempotency check failed, proceeding");
                IdempotencyCheck::Proceed
            }
        }
    }

    /// Atomically claims `key` in `processing`.
    pub async fn try_begin(&self, key: &str, operation: &str) -> Claim {
        self.try_begin_at(key, operation, Utc::now()).await
    }

    pub async fn try_begin_at(&self, key: &str, operation: &str, now: DateTime<Utc>) -> Claim {
        let record = IdempotencyRecord::processing(key, operation, now, self.ttl);
        match self.repo.try_claim(&record, now).await {
            Ok(ClaimOutcome::Claimed(_)) => Claim::Acquired,
            Ok(ClaimOutcome::Existing(existing)) => match duplicate_of(&existing) {
                Some(previous_result) => {
                    info!(key = %key, operation = %operation, status = %existing.status.as_str(), "operation already claimed");
                    Claim::Duplicate { previous_result }
                }
                // A failed record is always reclaimable, so a conforming
                // store never reports one as existing.
                None => Claim::Unguarded,
            },
            Err(e) => {
                warn!(key = %key, operation = %operation, error = %e, "idempotency claim failed, proceeding");
                Claim::Unguarded
            }
        }
    }

    pub async fn mark_completed(&self, key: &str, result: Option<JsonValue>) {
        if let Err(e) = self.repo.complete(key, result, Utc::now()).await {
            warn!(key = %key, error = %e, "failed to mark idempotency key completed");
        }
    }

    pub async fn mark_failed(&self, key: &str, error: &str) {
        if let Err(e) = self.repo.fail(key, error, Utc::now()).await {
            warn!(key = %key, error = %e, "failed to mark idempotency key failed");
        }
    }

    /// Runs `executor` at most once per key. A duplicate returns the cached
    /// result without invoking it; a failure is recorded and returned.
    pub async fn execute<T, F, Fut>(
        &self,
        key: &str,
        operation: &str,
        executor: F,
    ) -> AppResult<Idempotent<T>>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let claim = self.try_begin(key, operation).await;
        if let Claim::Duplicate { previous_result } = claim {
            return Ok(Idempotent::Duplicate(previous_result));
        }
        let guarded = claim == Claim::Acquired;

        match executor().await {
            Ok(value) => {
                if guarded {
                    let result = serde_json::to_value(&value).ok();
                    self.mark_completed(key, result).await;
                }
                Ok(Idempotent::Executed(value))
            }
            Err(e) => {
                if guarded {
                    self.mark_failed(key, &e.internal_message()).await;
                }
                Err(e)
            }
        }
    }

    /// Deletes at most `batch_limit` expired entries.
    pub async fn cleanup_expired(&self, batch_limit: i64) -> AppResult<u64> {
        let deleted = self.repo.delete_expired(Utc::now(), batch_limit).await?;
        if deleted > 0 {
            info!(deleted, "expired idempotency keys removed");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryStore;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn service(store: Arc<InMemoryStore>) -> IdempotencyService {
        IdempotencyService::new(store, 3600)
    }

    #[tokio::test]
    async fn executes_once_and_returns_cached_result() {
        let store = Arc::new(InMemoryStore::new());
        let svc = service(store);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let _ = svc
                .execute("op:1", "test", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, AppError>(42)
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            svc.check("op:1", "test").await,
            IdempotencyCheck::Duplicate {
                previous_result: Some(serde_json::json!(42))
            }
        );
    }

    #[tokio::test]
    async fn failure_is_recorded_and_retry_is_allowed() {
        let store = Arc::new(InMemoryStore::new());
        let svc = service(store.clone());

        let err = svc
            .execute("op:2", "test", || async {
                Err::<u32, _>(AppError::internal("boom"))
            })
            .await
            .unwrap_err();
        assert!(err.internal_message().contains("boom"));

        let record = store.idempotency_record("op:2").unwrap().unwrap();
        assert_eq!(record.status, IdempotencyStatus::Failed);
        assert_eq!(svc.check("op:2", "test").await, IdempotencyCheck::Proceed);

        let retried = svc
            .execute("op:2", "test", || async { Ok::<_, AppError>(7) })
            .await
            .unwrap();
        assert_eq!(retried, Idempotent::Executed(7));
    }

    #[tokio::test]
    async fn processing_key_is_a_duplicate() {
        let store = Arc::new(InMemoryStore::new());
        let svc = service(store);

        assert_eq!(svc.try_begin("op:3", "test").await, Claim::Acquired);
        assert_eq!(
            svc.try_begin("op:3", "test").await,
            Claim::Duplicate {
                previous_result: None
            }
        );
        assert!(svc.check("op:3", "test").await.is_duplicate());
    }

    #[tokio::test]
    async fn expired_key_can_be_reclaimed() {
        let store = Arc::new(InMemoryStore::new());
        let svc = service(store);
        let start = Utc::now();

        assert_eq!(svc.try_begin_at("op:4", "test", start).await, Claim::Acquired);
        let later = start + Duration::hours(2);
        assert_eq!(svc.check_at("op:4", "test", later).await, IdempotencyCheck::Proceed);
        assert_eq!(svc.try_begin_at("op:4", "test", later).await, Claim::Acquired);
    }

    #[tokio::test]
    async fn cleanup_is_bounded_by_batch() {
        let store = Arc::new(InMemoryStore::new());
        let svc = IdempotencyService::new(store.clone(), 0);
        let past = Utc::now() - Duration::hours(1);
        for i in 0..5 {
            svc.try_begin_at(&format!("old:{i}"), "test", past).await;
        }

        assert_eq!(svc.cleanup_expired(3).await.unwrap(), 3);
        assert_eq!(svc.cleanup_expired(3).await.unwrap(), 2);
    }
}
