use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::IdempotencyConfig;
use crate::services::idempotency::IdempotencyService;
use crate::services::rate_limiter::RateLimiter;

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub interval: Duration,
    /// Upper bound on rows deleted per store per cycle.
    pub batch: i64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            batch: 500,
        }
    }
}

impl From<&IdempotencyConfig> for CleanupConfig {
    fn from(config: &IdempotencyConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.cleanup_interval_secs),
            batch: config.cleanup_batch,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub idempotency_keys: u64,
    pub rate_limit_windows: u64,
}

/// Purges expired idempotency keys and closed rate-limit windows.
pub struct CleanupWorker {
    idempotency: IdempotencyService,
    rate_limiter: RateLimiter,
    config: CleanupConfig,
}

impl CleanupWorker {
    pub fn new(idempotency: IdempotencyService, rate_limiter: RateLimiter, config: CleanupConfig) -> Self {
        Self {
            idempotency,
            rate_limiter,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            batch = self.config.batch,
            "Starting idempotency cleanup worker..."
        );

        let mut interval = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.run_cycle_at(Utc::now()).await;
                    debug!(?report, "cleanup cycle finished");
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Idempotency cleanup worker received shutdown signal");
                        break;
                    }
                }
            }
        }

        info!("Idempotency cleanup worker stopped");
    }

    /// One pass over both stores. A failing store is logged and skipped.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> CleanupReport {
        let mut report = CleanupReport::default();

        match self.idempotency.cleanup_expired(self.config.batch).await {
            Ok(deleted) => report.idempotency_keys = deleted,
            Err(e) => warn!(error = %e.internal_message(), "idempotency key cleanup failed"),
        }

        match self.rate_limiter.cleanup_expired(now, self.config.batch).await {
            Ok(deleted) => report.rate_limit_windows = deleted,
            Err(e) => warn!(error = %e.internal_message(), "rate limit cleanup failed"),
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryStore;
    use crate::services::rate_limiter::{actions, counter_key};
    use std::sync::Arc;

    #[tokio::test]
    async fn cycle_removes_only_expired_entries() {
        let store = Arc::new(InMemoryStore::new());
        let idempotency = IdempotencyService::new(store.clone(), 3600);
        let rate_limiter = RateLimiter::new(store.clone());
        let now = Utc::now();
        let long_ago = now - chrono::Duration::days(3);

        idempotency.try_begin_at("old-key", "webhook", long_ago).await;
        idempotency.try_begin_at("fresh-key", "webhook", now).await;
        rate_limiter.check_at("user-1", actions::PAYMENT_INTENT, long_ago).await;
        rate_limiter.check_at("user-2", actions::PAYMENT_INTENT, now).await;

        let worker = CleanupWorker::new(idempotency, rate_limiter, CleanupConfig::default());
        let report = worker.run_cycle_at(now).await;

        assert_eq!(report.idempotency_keys, 1);
        assert_eq!(report.rate_limit_windows, 1);
        assert!(store.idempotency_record("old-key").unwrap().is_none());
        assert!(store.idempotency_record("fresh-key").unwrap().is_some());
        assert!(store
            .rate_limit_record(&counter_key("user-1", actions::PAYMENT_INTENT))
            .unwrap()
            .is_none());
        assert!(store
            .rate_limit_record(&counter_key("user-2", actions::PAYMENT_INTENT))
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn worker_stops_on_shutdown() {
        let store = Arc::new(InMemoryStore::new());
        let worker = CleanupWorker::new(
            IdempotencyService::new(store.clone(), 3600),
            RateLimiter::new(store),
            CleanupConfig {
                interval: Duration::from_secs(3600),
                batch: 10,
            },
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
