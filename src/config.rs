/// Configuration management for the account coordinator
use crate::error::{ServiceError, ServiceResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub cache: CacheSettings,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Also used as the `source` field of every emitted event
    pub name: String,
    /// Also used as the `version` field of every emitted event
    pub version: String,
    pub hostname: String,
    pub port: u16,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub max_connections: u32,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_secs: i64,
    /// Shared secret presented by internal services
    pub internal_api_key: String,
    pub password_hash_memory_kib: u32,
    pub password_hash_iterations: u32,
}

/// Account cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Use Redis when true, an in-process map otherwise
    pub enabled: bool,
    pub redis_url: String,
    pub key_prefix: String,
    pub account_ttl_secs: u64,
}

/// Event stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Use Redis Streams when true, the in-process bus otherwise
    pub enabled: bool,
    pub redis_url: String,
    pub topic: String,
    pub reconnect_interval_secs: u64,
    pub drain_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(key: &str, default: T) -> ServiceResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ServiceError::Configuration(format!("Invalid value for {}: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ServiceResult<Self> {
        dotenv::dotenv().ok();

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| ServiceError::Configuration("JWT_SECRET is required".to_string()))?;
        let internal_api_key = env::var("INTERNAL_API_KEY")
            .map_err(|_| ServiceError::Configuration("INTERNAL_API_KEY is required".to_string()))?;

        let redis_url = env_or("REDIS_URL", "redis://localhost:6379");

        Ok(ServerConfig {
            service: ServiceConfig {
                name: env_or("SERVICE_NAME", "account-service"),
                version: env_or("SERVICE_VERSION", "1.0.0"),
                hostname: env_or("HOST", "0.0.0.0"),
                port: parse_env("PORT", 3001)?,
            },
            storage: StorageConfig {
                database_path: env_or("DATABASE_PATH", "./data/accounts.sqlite").into(),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            authentication: AuthConfig {
                jwt_secret,
                token_ttl_secs: parse_env("JWT_TTL_SECS", 86_400)?,
                internal_api_key,
                password_hash_memory_kib: parse_env("PASSWORD_HASH_MEMORY_KIB", 19_456)?,
                password_hash_iterations: parse_env("PASSWORD_HASH_ITERATIONS", 2)?,
            },
            cache: CacheSettings {
                enabled: parse_env("CACHE_ENABLED", false)?,
                redis_url: redis_url.clone(),
                key_prefix: env_or("CACHE_KEY_PREFIX", "accounts:"),
                account_ttl_secs: parse_env("CACHE_ACCOUNT_TTL_SECS", 300)?,
            },
            events: EventsConfig {
                enabled: parse_env("EVENTS_ENABLED", false)?,
                redis_url: env::var("EVENTS_REDIS_URL").unwrap_or(redis_url),
                topic: env_or("EVENTS_TOPIC", "account.events"),
                reconnect_interval_secs: parse_env("EVENTS_RECONNECT_INTERVAL_SECS", 5)?,
                drain_timeout_secs: parse_env("EVENTS_DRAIN_TIMEOUT_SECS", 5)?,
            },
            logging: LoggingConfig {
                level: env_or("RUST_LOG", "account_coordinator=debug,tower_http=debug"),
                json: env_or("LOG_FORMAT", "text").eq_ignore_ascii_case("json"),
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> ServiceResult<()> {
        if self.authentication.jwt_secret.len() < 32 {
            return Err(ServiceError::Configuration(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.authentication.internal_api_key.trim().is_empty() {
            return Err(ServiceError::Configuration(
                "Internal API key cannot be empty".to_string(),
            ));
        }

        if self.authentication.token_ttl_secs <= 0 {
            return Err(ServiceError::Configuration(
                "Token TTL must be positive".to_string(),
            ));
        }

        if self.cache.account_ttl_secs == 0 {
            return Err(ServiceError::Configuration(
                "Account cache TTL must be positive".to_string(),
            ));
        }

        if self.events.topic.trim().is_empty() {
            return Err(ServiceError::Configuration("Event topic cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Configuration suitable for tests: in-process cache and bus, cheap hashing
    pub fn for_tests() -> Self {
        ServerConfig {
            service: ServiceConfig {
                name: "account-service".to_string(),
                version: "1.0.0".to_string(),
                hostname: "127.0.0.1".to_string(),
                port: 0,
            },
            storage: StorageConfig {
                database_path: PathBuf::from(":memory:"),
                max_connections: 1,
            },
            authentication: AuthConfig {
                jwt_secret: "test-secret-key-for-testing-only-0123456789".to_string(),
                token_ttl_secs: 3600,
                internal_api_key: "internal-test-key".to_string(),
                password_hash_memory_kib: 1024,
                password_hash_iterations: 1,
            },
            cache: CacheSettings {
                enabled: false,
                redis_url: "redis://localhost:6379".to_string(),
                key_prefix: "accounts:".to_string(),
                account_ttl_secs: 300,
            },
            events: EventsConfig {
                enabled: false,
                redis_url: "redis://localhost:6379".to_string(),
                topic: "account.events".to_string(),
                reconnect_interval_secs: 5,
                drain_timeout_secs: 1,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                json: false,
            },
        }
    }
}
