//! Persistence: repository traits, the in-memory backend and (with the
//! `database` feature) the Postgres backend.

#[cfg(feature = "database")]
pub mod audit_repository;
#[cfg(feature = "database")]
pub mod booking_repository;
pub mod error;
#[cfg(feature = "database")]
pub mod escrow_repository;
#[cfg(feature = "database")]
pub mod feature_flag_repository;
#[cfg(feature = "database")]
pub mod idempotency_repository;
pub mod memory;
#[cfg(feature = "database")]
pub mod payment_repository;
#[cfg(feature = "database")]
pub mod rate_limit_repository;
pub mod repository;
#[cfg(feature = "database")]
pub mod user_directory;

use std::sync::Arc;

use self::memory::InMemoryStore;
use self::repository::{
    AuditRepository, BookingRepository, EscrowRepository, FeatureFlagRepository,
    IdempotencyRepository, NotificationRepository, PaymentRepository, RateLimitRepository,
    UserDirectory,
};

#[cfg(feature = "database")]
pub use self::pool::{health_check, init_pool, init_pool_from_config, PoolConfig};

/// Every store the services depend on, behind trait objects.
#[derive(Clone)]
pub struct Repositories {
    pub bookings: Arc<dyn BookingRepository>,
    pub escrows: Arc<dyn EscrowRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub idempotency: Arc<dyn IdempotencyRepository>,
    pub rate_limits: Arc<dyn RateLimitRepository>,
    pub feature_flags: Arc<dyn FeatureFlagRepository>,
    pub audit: Arc<dyn AuditRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub users: Arc<dyn UserDirectory>,
}

impl Repositories {
    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            bookings: store.clone(),
            escrows: store.clone(),
            payments: store.clone(),
            idempotency: store.clone(),
            rate_limits: store.clone(),
            feature_flags: store.clone(),
            audit: store.clone(),
            notifications: store.clone(),
            users: store,
        }
    }

    #[cfg(feature = "database")]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let audit = Arc::new(audit_repository::PgAuditRepository::new(pool.clone()));
        Self {
            bookings: Arc::new(booking_repository::PgBookingRepository::new(pool.clone())),
            escrows: Arc::new(escrow_repository::PgEscrowRepository::new(pool.clone())),
            payments: Arc::new(payment_repository::PgPaymentRepository::new(pool.clone())),
            idempotency: Arc::new(idempotency_repository::PgIdempotencyRepository::new(
                pool.clone(),
            )),
            rate_limits: Arc::new(rate_limit_repository::PgRateLimitRepository::new(
                pool.clone(),
            )),
            feature_flags: Arc::new(feature_flag_repository::PgFeatureFlagRepository::new(
                pool.clone(),
            )),
            audit: audit.clone(),
            notifications: audit,
            users: Arc::new(user_directory::PgUserDirectory::new(pool)),
        }
    }
}

#[cfg(feature = "database")]
mod pool {
    use sqlx::postgres::PgPoolOptions;
    use sqlx::PgPool;
    use std::time::Duration;
    use tracing::{error as log_error, info, warn};

    use super::error::DatabaseError;
    use crate::config::DatabaseConfig;

    /// Database pool configuration
    #[derive(Debug, Clone)]
    pub struct PoolConfig {
        pub max_connections: u32,
        pub min_connections: u32,
        pub connection_timeout: Duration,
        pub idle_timeout: Duration,
        pub max_lifetime: Duration,
    }

    impl Default for PoolConfig {
        fn default() -> Self {
            Self {
                max_connections: 20,
                min_connections: 5,
                connection_timeout: Duration::from_secs(30),
                idle_timeout: Duration::from_secs(600),
                max_lifetime: Duration::from_secs(1800),
            }
        }
    }

    /// Initialize the database connection pool
    pub async fn init_pool(
        database_url: &str,
        config: Option<PoolConfig>,
    ) -> Result<PgPool, DatabaseError> {
        let config = config.unwrap_or_default();

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connection_timeout = ?config.connection_timeout,
            "Initializing database pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connection_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| {
                log_error!("Failed to initialize database pool: {}", e);
                DatabaseError::from_sqlx(e)
            })?;

        info!("Database pool initialized successfully");
        Ok(pool)
    }

    /// Connection pool health check
    pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(pool).await.map_err(|e| {
            warn!("Health check failed: {}", e);
            DatabaseError::from_sqlx(e)
        })?;
        Ok(())
    }

    /// Initialize the database pool from application configuration
    pub async fn init_pool_from_config(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
        let pool_config = PoolConfig {
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connection_timeout: Duration::from_secs(config.connection_timeout),
            idle_timeout: Duration::from_secs(config.idle_timeout.unwrap_or(600)),
            max_lifetime: Duration::from_secs(1800),
        };

        init_pool(&config.url, Some(pool_config)).await
    }

}
