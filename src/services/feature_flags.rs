//! Kill-switches gating whole subsystems.
//!
//! Durable flags are read through a short-lived [`FlagCache`]; process
//! environment overrides (`FEATURE_<NAME>_ENABLED`) win over the store. A
//! flag that was never written is enabled.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::database::repository::FeatureFlagRepository;
use crate::error::{AppError, AppErrorKind, AppResult, ExternalError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Payments,
    Bookings,
    Reviews,
    Escrow,
    EscrowAutoRelease,
    Notifications,
    Webhooks,
}

impl Feature {
    pub const ALL: [Feature; 7] = [
        Feature::Payments,
        Feature::Bookings,
        Feature::Reviews,
        Feature::Escrow,
        Feature::EscrowAutoRelease,
        Feature::Notifications,
        Feature::Webhooks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Payments => "payments",
            Feature::Bookings => "bookings",
            Feature::Reviews => "reviews",
            Feature::Escrow => "escrow",
            Feature::EscrowAutoRelease => "escrow_auto_release",
            Feature::Notifications => "notifications",
            Feature::Webhooks => "webhooks",
        }
    }

    pub fn env_key(&self) -> String {
        format!("FEATURE_{}_ENABLED", self.as_str().to_uppercase())
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Feature::ALL
            .into_iter()
            .find(|f| f.as_str() == normalized)
            .ok_or_else(|| AppError::invalid_value("flag", format!("unknown feature flag '{}'", s)))
    }
}

/// Snapshot of the durable flags and when it was read.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagCache {
    pub snapshot: HashMap<String, bool>,
    pub fetched_at: DateTime<Utc>,
}

impl FlagCache {
    pub fn new(snapshot: HashMap<String, bool>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            snapshot,
            fetched_at,
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.fetched_at < ttl
    }

    pub fn get(&self, feature: Feature) -> Option<bool> {
        self.snapshot.get(feature.as_str()).copied()
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub struct FeatureFlags {
    source: Arc<dyn FeatureFlagRepository>,
    cache: RwLock<Option<FlagCache>>,
    ttl: Duration,
    overrides: HashMap<Feature, bool>,
}

impl FeatureFlags {
    pub fn new(source: Arc<dyn FeatureFlagRepository>, cache_ttl_secs: u64) -> Self {
        Self {
            source,
            cache: RwLock::new(None),
            ttl: Duration::seconds(cache_ttl_secs.min(i64::MAX as u64) as i64),
            overrides: HashMap::new(),
        }
    }

    /// Reads `FEATURE_<NAME>_ENABLED` for every flag.
    pub fn with_env_overrides(mut self) -> Self {
        for feature in Feature::ALL {
            if let Ok(raw) = std::env::var(feature.env_key()) {
                match parse_bool(&raw) {
                    Some(enabled) => {
                        info!(flag = %feature, enabled, "feature flag overridden by environment");
                        self.overrides.insert(feature, enabled);
                    }
                    None => warn!(flag = %feature, value = %raw, "ignoring unparseable feature flag override"),
                }
            }
        }
        self
    }

    pub fn with_override(mut self, feature: Feature, enabled: bool) -> Self {
        self.overrides.insert(feature, enabled);
        self
    }

    /// Seeds the cache, e.g. with a fixed snapshot in tests.
    pub async fn prime(&self, cache: FlagCache) {
        *self.cache.write().await = Some(cache);
    }

    pub async fn clear_cache(&self) {
        *self.cache.write().await = None;
    }

    pub async fn is_enabled(&self, feature: Feature) -> bool {
        self.is_enabled_at(feature, Utc::now()).await
    }

    pub async fn is_enabled_at(&self, feature: Feature, now: DateTime<Utc>) -> bool {
        if let Some(enabled) = self.overrides.get(&feature) {
            return *enabled;
        }
        self.snapshot_at(now).await.get(feature).unwrap_or(true)
    }

    async fn snapshot_at(&self, now: DateTime<Utc>) -> FlagCache {
        if let Some(cache) = self.cache.read().await.as_ref() {
            if cache.is_fresh(now, self.ttl) {
                return cache.clone();
            }
        }

        let mut guard = self.cache.write().await;
        if let Some(cache) = guard.as_ref() {
            if cache.is_fresh(now, self.ttl) {
                return cache.clone();
            }
        }

        match self.source.load_all().await {
            Ok(snapshot) => {
                let fresh = FlagCache::new(snapshot, now);
                *guard = Some(fresh.clone());
                fresh
            }
            Err(e) => {
                warn!(error = %e, "failed to load feature flags, serving last known values");
                guard
                    .clone()
                    .unwrap_or_else(|| FlagCache::new(HashMap::new(), now))
            }
        }
    }

    /// Fails with `unavailable` when the feature is switched off.
    pub async fn require_enabled(&self, feature: Feature) -> AppResult<()> {
        if self.is_enabled(feature).await {
            return Ok(());
        }
        warn!(flag = %feature, "request blocked by kill-switch");
        Err(AppError::new(AppErrorKind::External(ExternalError::FeatureDisabled {
            feature: feature.as_str().to_string(),
        })))
    }

    pub async fn set_flag(&self, feature: Feature, enabled: bool, updated_by: &str) -> AppResult<()> {
        self.source.set(feature.as_str(), enabled, updated_by).await?;
        self.clear_cache().await;
        info!(flag = %feature, enabled, updated_by = %updated_by, "feature flag updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::error::{DatabaseError, DatabaseErrorKind};
    use crate::database::memory::InMemoryStore;
    use crate::database::repository::DbResult;
    use crate::error::ErrorCode;
    use async_trait::async_trait;

    struct DownSource;

    #[async_trait]
    impl FeatureFlagRepository for DownSource {
        async fn load_all(&self) -> DbResult<HashMap<String, bool>> {
            Err(DatabaseError::new(DatabaseErrorKind::Connection {
                message: "down".to_string(),
            }))
        }

        async fn set(&self, _: &str, _: bool, _: &str) -> DbResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn missing_flags_default_to_enabled() {
        let flags = FeatureFlags::new(Arc::new(InMemoryStore::new()), 60);
        for feature in Feature::ALL {
            assert!(flags.is_enabled(feature).await, "{feature}");
        }
    }

    #[tokio::test]
    async fn cached_snapshot_expires_after_ttl() {
        let store = Arc::new(InMemoryStore::new());
        let flags = FeatureFlags::new(store.clone(), 60);
        let now = Utc::now();
        flags
            .prime(FlagCache::new(HashMap::from([("payments".to_string(), false)]), now))
            .await;

        // The store says enabled; the primed snapshot wins while fresh.
        assert!(!flags.is_enabled_at(Feature::Payments, now + Duration::seconds(30)).await);
        assert!(flags.is_enabled_at(Feature::Payments, now + Duration::seconds(61)).await);
    }

    #[tokio::test]
    async fn set_flag_clears_cache_for_writer() {
        let flags = FeatureFlags::new(Arc::new(InMemoryStore::new()), 600);
        assert!(flags.is_enabled(Feature::Webhooks).await);

        flags.set_flag(Feature::Webhooks, false, "admin-1").await.unwrap();
        assert!(!flags.is_enabled(Feature::Webhooks).await);

        let err = flags.require_enabled(Feature::Webhooks).await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::Unavailable);
        assert!(!err.user_message().contains("webhooks"));
    }

    #[tokio::test]
    async fn override_beats_store() {
        let store = Arc::new(InMemoryStore::new());
        let flags = FeatureFlags::new(store, 60).with_override(Feature::Escrow, false);
        assert!(!flags.is_enabled(Feature::Escrow).await);
    }

    #[tokio::test]
    async fn source_failure_serves_stale_snapshot() {
        let flags = FeatureFlags::new(Arc::new(DownSource), 60);
        let then = Utc::now() - Duration::hours(1);
        flags
            .prime(FlagCache::new(HashMap::from([("bookings".to_string(), false)]), then))
            .await;

        assert!(!flags.is_enabled(Feature::Bookings).await);
        assert!(flags.is_enabled(Feature::Payments).await);
    }

    #[test]
    fn parses_flag_names() {
        assert_eq!("escrow-auto-release".parse::<Feature>().unwrap(), Feature::EscrowAutoRelease);
        assert!("search".parse::<Feature>().is_err());
        assert_eq!(Feature::EscrowAutoRelease.env_key(), "FEATURE_ESCROW_AUTO_RELEASE_ENABLED");
    }
}
