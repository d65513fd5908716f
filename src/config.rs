//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub idempotency: IdempotencyConfig,
    pub feature_flags: FeatureFlagConfig,
    pub escrow: EscrowConfig,
    /// Run on in-memory stores without Postgres or Redis
    pub skip_externals: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub max_connections: u32,
    /// Count rate limits in Redis instead of the database
    pub rate_limits_in_redis: bool,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    pub ttl_secs: u64,
    pub cleanup_batch: i64,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct FeatureFlagConfig {
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone)]
pub struct EscrowConfig {
    /// Dispute window between service completion and automatic release
    pub hold_hours: i64,
    pub release_interval_secs: u64,
    pub release_batch: i64,
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(default),
    }
}

fn flag(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let skip_externals = flag("SKIP_EXTERNALS");
        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env(skip_externals)?,
            cache: CacheConfig::from_env()?,
            logging: LoggingConfig::from_env(),
            idempotency: IdempotencyConfig::from_env()?,
            feature_flags: FeatureFlagConfig::from_env()?,
            escrow: EscrowConfig::from_env()?,
            skip_externals,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if !self.skip_externals {
            self.database.validate()?;
            self.cache.validate()?;
        }
        self.logging.validate()?;
        self.idempotency.validate()?;
        self.escrow.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_or("SERVER_PORT", 8000)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env(skip_externals: bool) -> Result<Self, ConfigError> {
        let url = match env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) if skip_externals => String::new(),
            Err(_) => return Err(ConfigError::MissingVariable("DATABASE_URL".to_string())),
        };
        Ok(DatabaseConfig {
            url,
            max_connections: parse_or("DB_MAX_CONNECTIONS", 20)?,
            min_connections: parse_or("DB_MIN_CONNECTIONS", 5)?,
            connection_timeout: parse_or("DB_CONNECTION_TIMEOUT", 30)?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CacheConfig {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            max_connections: parse_or("CACHE_MAX_CONNECTIONS", 10)?,
            rate_limits_in_redis: flag("RATE_LIMIT_USE_REDIS"),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_empty() {
            return Err(ConfigError::InvalidValue("REDIS_URL".to_string()));
        }

        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            return Err(ConfigError::InvalidValue(
                "REDIS_URL must start with redis:// or rediss://".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 86_400,
            cleanup_batch: 500,
            cleanup_interval_secs: 3_600,
        }
    }
}

impl IdempotencyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            ttl_secs: parse_or("IDEMPOTENCY_TTL_SECS", defaults.ttl_secs)?,
            cleanup_batch: parse_or("IDEMPOTENCY_CLEANUP_BATCH", defaults.cleanup_batch)?,
            cleanup_interval_secs: parse_or(
                "IDEMPOTENCY_CLEANUP_INTERVAL_SECS",
                defaults.cleanup_interval_secs,
            )?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "IDEMPOTENCY_TTL_SECS must be positive".to_string(),
            ));
        }
        if self.cleanup_batch <= 0 {
            return Err(ConfigError::ValidationFailed(
                "IDEMPOTENCY_CLEANUP_BATCH must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for FeatureFlagConfig {
    fn default() -> Self {
        Self { cache_ttl_secs: 60 }
    }
}

impl FeatureFlagConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            cache_ttl_secs: parse_or("FEATURE_FLAG_CACHE_TTL_SECS", 60)?,
        })
    }
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            hold_hours: 48,
            release_interval_secs: 900,
            release_batch: 100,
        }
    }
}

impl EscrowConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            hold_hours: parse_or("ESCROW_HOLD_HOURS", defaults.hold_hours)?,
            release_interval_secs: parse_or(
                "ESCROW_RELEASE_INTERVAL_SECS",
                defaults.release_interval_secs,
            )?,
            release_batch: parse_or("ESCROW_RELEASE_BATCH", defaults.release_batch)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hold_hours < 0 {
            return Err(ConfigError::ValidationFailed(
                "ESCROW_HOLD_HOURS cannot be negative".to_string(),
            ));
        }
        if self.release_interval_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "ESCROW_RELEASE_INTERVAL_SECS must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<ConfigError> for crate::error::AppError {
    fn from(err: ConfigError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: err.to_string(),
            },
        ))
    }
}
