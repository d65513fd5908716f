use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use eventhub_backend::api::{self, AppState};
use eventhub_backend::config::AppConfig;
use eventhub_backend::database::memory::InMemoryStore;
use eventhub_backend::database::Repositories;
use eventhub_backend::health::HealthChecker;
use eventhub_backend::logging::init_tracing;
use eventhub_backend::payments::PaymentProviderRegistry;
use eventhub_backend::services::feature_flags::FeatureFlags;
use eventhub_backend::services::{ServiceSettings, Services};
use eventhub_backend::workers::escrow_release::{EscrowReleaseConfig, EscrowReleaseWorker};
use eventhub_backend::workers::idempotency_cleanup::{CleanupConfig, CleanupWorker};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

/// Postgres-backed repositories, or the in-memory store with SKIP_EXTERNALS.
async fn build_repositories(
    config: &AppConfig,
    health: HealthChecker,
) -> anyhow::Result<(Repositories, HealthChecker)> {
    if config.skip_externals {
        info!("⏭️  Skipping database initialization (SKIP_EXTERNALS=true)");
        return Ok((Repositories::in_memory(Arc::new(InMemoryStore::new())), health));
    }
    connect_database(config, health).await
}

#[cfg(feature = "database")]
async fn connect_database(
    config: &AppConfig,
    health: HealthChecker,
) -> anyhow::Result<(Repositories, HealthChecker)> {
    info!("📊 Initializing database connection pool...");
    let pool = eventhub_backend::database::init_pool_from_config(&config.database)
        .await
        .map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            e
        })?;
    info!(
        max_connections = pool.options().get_max_connections(),
        "✅ Database connection pool initialized"
    );
    Ok((Repositories::postgres(pool.clone()), health.with_database(pool)))
}

#[cfg(not(feature = "database"))]
async fn connect_database(
    _config: &AppConfig,
    _health: HealthChecker,
) -> anyhow::Result<(Repositories, HealthChecker)> {
    anyhow::bail!("built without the `database` feature; set SKIP_EXTERNALS=true")
}

#[cfg(feature = "cache")]
async fn attach_cache(
    config: &AppConfig,
    mut repos: Repositories,
    health: HealthChecker,
) -> anyhow::Result<(Repositories, HealthChecker)> {
    use eventhub_backend::cache::{init_cache_pool, RedisRateLimitStore};

    if config.skip_externals {
        info!("⏭️  Skipping Redis initialization (SKIP_EXTERNALS=true)");
        return Ok((repos, health));
    }

    info!("🔄 Initializing Redis cache connection pool...");
    let pool = init_cache_pool((&config.cache).into()).await.map_err(|e| {
        error!("Failed to initialize cache pool: {}", e);
        e
    })?;
    if config.cache.rate_limits_in_redis {
        info!("Rate limit counters kept in Redis");
        repos.rate_limits = Arc::new(RedisRateLimitStore::new(pool.clone()));
    }
    info!("✅ Cache connection pool initialized");
    Ok((repos, health.with_cache(pool)))
}

#[cfg(not(feature = "cache"))]
async fn attach_cache(
    _config: &AppConfig,
    repos: Repositories,
    health: HealthChecker,
) -> anyhow::Result<(Repositories, HealthChecker)> {
    Ok((repos, health))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting EventHub backend service"
    );

    let (repos, health) = build_repositories(&config, HealthChecker::in_memory()).await?;
    let (repos, health) = attach_cache(&config, repos, health).await?;

    info!("💳 Registering payment providers...");
    let providers = PaymentProviderRegistry::from_env()?;
    let available = providers.list_available_providers();
    if available.is_empty() {
        warn!("No payment provider is configured; payment intents will be rejected");
    } else {
        info!(providers = ?available, "✅ Payment providers registered");
    }

    let flags = Arc::new(
        FeatureFlags::new(repos.feature_flags.clone(), config.feature_flags.cache_ttl_secs)
            .with_env_overrides(),
    );
    let services = Services::build(&repos, providers, flags, ServiceSettings::from(&config));

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let cleanup_worker = CleanupWorker::new(
        services.idempotency.clone(),
        services.rate_limiter.clone(),
        CleanupConfig::from(&config.idempotency),
    );
    let release_worker = EscrowReleaseWorker::new(
        services.ledger.clone(),
        services.flags.clone(),
        EscrowReleaseConfig::from(&config.escrow),
    );
    let worker_handles = vec![
        tokio::spawn(cleanup_worker.run(worker_shutdown_rx.clone())),
        tokio::spawn(release_worker.run(worker_shutdown_rx)),
    ];
    info!("✅ Background workers started");

    info!("🛣️  Setting up application routes...");
    let app = api::router(AppState { services, health });
    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║                                                              ║");
    println!("║          🚀 EVENTHUB BACKEND SERVER IS RUNNING 🚀            ║");
    println!("║                                                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  🌐 Server Address:  http://{}", addr);
    println!("║  🗄️  Storage:         {}", if config.skip_externals { "in-memory" } else { "postgres" });
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  📡 AVAILABLE ENDPOINTS:                                     ║");
    println!("║                                                              ║");
    println!("║  GET  /health                      - Health check           ║");
    println!("║  POST /v1/bookings/{{action}}        - Booking lifecycle      ║");
    println!("║  POST /v1/payments/intents         - Create payment intent  ║");
    println!("║  POST /v1/payments/confirm         - Manual confirmation    ║");
    println!("║  PUT  /v1/admin/feature-flags/{{f}}  - Kill-switches          ║");
    println!("║  POST /webhooks/{{provider}}         - Provider webhooks      ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    for handle in worker_handles {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            error!("Timed out waiting for worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");
    Ok(())
}
