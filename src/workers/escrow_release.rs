use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::EscrowConfig;
use crate::error::AppResult;
use crate::services::escrow::{EscrowLedger, ReleaseSummary};
use crate::services::feature_flags::{Feature, FeatureFlags};

#[derive(Debug, Clone)]
pub struct EscrowReleaseConfig {
    pub poll_interval: Duration,
    /// Dispute window after service completion.
    pub hold: chrono::Duration,
    pub batch: i64,
}

impl Default for EscrowReleaseConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(900),
            hold: chrono::Duration::hours(48),
            batch: 100,
        }
    }
}

impl From<&EscrowConfig> for EscrowReleaseConfig {
    fn from(config: &EscrowConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.release_interval_secs),
            hold: chrono::Duration::hours(config.hold_hours),
            batch: config.release_batch,
        }
    }
}

/// Releases service-completed escrows to suppliers once their hold window
/// has passed.
pub struct EscrowReleaseWorker {
    ledger: Arc<EscrowLedger>,
    flags: Arc<FeatureFlags>,
    config: EscrowReleaseConfig,
}

impl EscrowReleaseWorker {
    pub fn new(ledger: Arc<EscrowLedger>, flags: Arc<FeatureFlags>, config: EscrowReleaseConfig) -> Self {
        Self {
            ledger,
            flags,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            hold_hours = self.config.hold.num_hours(),
            batch = self.config.batch,
            "Starting escrow release worker..."
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle_at(Utc::now()).await {
                        error!(error = %e.internal_message(), "escrow release cycle failed");
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Escrow release worker received shutdown signal");
                        break;
                    }
                }
            }
        }

        info!("Escrow release worker stopped");
    }

    /// Returns `None` when either the escrow or the auto-release switch is off.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> AppResult<Option<ReleaseSummary>> {
        if !self.flags.is_enabled(Feature::Escrow).await
            || !self.flags.is_enabled(Feature::EscrowAutoRelease).await
        {
            info!("escrow auto-release disabled, skipping cycle");
            return Ok(None);
        }

        let summary = self
            .ledger
            .release_due(now, self.config.hold, self.config.batch)
            .await?;
        if summary.released > 0 || summary.failed > 0 {
            info!(
                released = summary.released,
                failed = summary.failed,
                "escrow release cycle finished"
            );
        }
        Ok(Some(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EscrowStatus;
    use crate::services::testing::Harness;

    async fn completed_service(h: &Harness) -> String {
        let (booking, _) = h.paid_booking(80_000).await;
        h.services
            .bookings
            .start_service(&Harness::supplier(), &booking.id)
            .await
            .unwrap();
        h.services
            .bookings
            .complete_booking(&Harness::client(), &booking.id)
            .await
            .unwrap();
        booking.id
    }

    fn worker(h: &Harness) -> EscrowReleaseWorker {
        EscrowReleaseWorker::new(
            h.services.ledger.clone(),
            h.services.flags.clone(),
            EscrowReleaseConfig::default(),
        )
    }

    #[tokio::test]
    async fn releases_only_after_the_hold_window() {
        let h = Harness::new().await;
        let booking_id = completed_service(&h).await;
        let worker = worker(&h);

        let early = worker
            .run_cycle_at(Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(early.released, 0);

        let due = worker
            .run_cycle_at(Utc::now() + chrono::Duration::hours(49))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(due.released, 1);

        let escrow = h
            .services
            .ledger
            .get_escrow_by_booking_id(&booking_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(escrow.status, EscrowStatus::Released);
        assert_eq!(escrow.release_actor.as_deref(), Some("system:auto_release"));
    }

    #[tokio::test]
    async fn kill_switch_skips_the_cycle() {
        let h = Harness::with_flags(|f| f.with_override(Feature::EscrowAutoRelease, false)).await;
        let booking_id = completed_service(&h).await;

        let outcome = worker(&h)
            .run_cycle_at(Utc::now() + chrono::Duration::hours(49))
            .await
            .unwrap();
        assert!(outcome.is_none());

        let escrow = h
            .services
            .ledger
            .get_escrow_by_booking_id(&booking_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(escrow.status, EscrowStatus::ServiceCompleted);
    }
}
