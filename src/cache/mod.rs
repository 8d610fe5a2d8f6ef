/// Caching layer for the account coordinator
///
/// Provides a narrow key/value interface with per-entry TTL, backed by Redis
/// in multi-instance deployments or by an in-process map otherwise, plus a
/// typed JSON client that namespaces keys by category.

use crate::{
    error::{ServiceError, ServiceResult},
    metrics,
};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Raw cache backend
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> ServiceResult<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> ServiceResult<()>;

    async fn delete(&self, key: &str) -> ServiceResult<()>;

    async fn ping(&self) -> ServiceResult<()>;
}

/// Redis-backed cache store
#[derive(Clone)]
pub struct RedisCacheStore {
    connection: ConnectionManager,
}

impl RedisCacheStore {
    /// Connect to Redis
    pub async fn connect(redis_url: &str) -> ServiceResult<Self> {
        info!("Connecting to Redis cache at {}", redis_url);

        let client = Client::open(redis_url).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            ServiceError::Internal(format!("Redis client creation failed: {}", e))
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to connect to Redis: {}", e);
            ServiceError::Internal(format!("Redis connection failed: {}", e))
        })?;

        info!("Redis cache connection established");

        Ok(Self { connection })
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> ServiceResult<Option<String>> {
        let mut conn = self.connection.clone();
        conn.get(key).await.map_err(|e| {
            warn!("Redis GET failed for {}: {}", key, e);
            ServiceError::Internal(format!("Cache get failed: {}", e))
        })
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> ServiceResult<()> {
        let mut conn = self.connection.clone();
        let millis = ttl.as_millis().max(1) as u64;
        conn.pset_ex::<_, _, ()>(key, value, millis)
            .await
            .map_err(|e| {
                warn!("Redis SET failed for {}: {}", key, e);
                ServiceError::Internal(format!("Cache set failed: {}", e))
            })
    }

    async fn delete(&self, key: &str) -> ServiceResult<()> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key).await.map_err(|e| {
            warn!("Redis DELETE failed for {}: {}", key, e);
            ServiceError::Internal(format!("Cache delete failed: {}", e))
        })
    }

    async fn ping(&self) -> ServiceResult<()> {
        let mut conn = self.connection.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await.map_err(|e| {
            error!("Redis PING failed: {}", e);
            ServiceError::Internal(format!("Cache ping failed: {}", e))
        })?;

        if pong != "PONG" {
            return Err(ServiceError::Internal(
                "Unexpected Redis PING response".to_string(),
            ));
        }

        Ok(())
    }
}

/// In-process cache store with lazy expiry
///
/// Can be switched offline to simulate an unreachable cache.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, (String, Instant)>>,
    offline: AtomicBool,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until switched back online
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_online(&self) -> ServiceResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ServiceError::Internal("Cache unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> ServiceResult<Option<String>> {
        self.check_online()?;

        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expires_at)) if *expires_at > Instant::now() => {
                    return Ok(Some(value.clone()))
                }
                None => return Ok(None),
                Some(_) => {}
            }
        }

        // Expired; drop it
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> ServiceResult<()> {
        self.check_online()?;
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> ServiceResult<()> {
        self.check_online()?;
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn ping(&self) -> ServiceResult<()> {
        self.check_online()
    }
}

/// Typed cache client
#[derive(Clone)]
pub struct CacheClient {
    store: Arc<dyn CacheStore>,
    key_prefix: String,
}

impl CacheClient {
    pub fn new(store: Arc<dyn CacheStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    /// Build a cache key with prefix
    fn build_key(&self, category: &str, key: &str) -> String {
        format!("{}{}{}", self.key_prefix, category, key)
    }

    /// Get a value from cache
    pub async fn get<T: DeserializeOwned>(&self, category: &str, key: &str) -> ServiceResult<Option<T>> {
        let cache_key = self.build_key(category, key);
        let metric_label = category.trim_end_matches(':');

        match self.store.get(&cache_key).await? {
            Some(json) => match serde_json::from_str(&json) {
                Ok(value) => {
                    debug!("Cache HIT: {}", cache_key);
                    metrics::record_cache_access(metric_label, true);
                    Ok(Some(value))
                }
                Err(e) => {
                    warn!("Failed to deserialize cached value for {}: {}", cache_key, e);
                    // Delete corrupted cache entry
                    let _ = self.store.delete(&cache_key).await;
                    metrics::record_cache_access(metric_label, false);
                    Ok(None)
                }
            },
            None => {
                debug!("Cache MISS: {}", cache_key);
                metrics::record_cache_access(metric_label, false);
                Ok(None)
            }
        }
    }

    /// Set a value in cache with TTL
    pub async fn set<T: Serialize>(
        &self,
        category: &str,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> ServiceResult<()> {
        let cache_key = self.build_key(category, key);

        let json = serde_json::to_string(value).map_err(|e| {
            error!("Failed to serialize value for cache: {}", e);
            ServiceError::Internal(format!("Cache serialization failed: {}", e))
        })?;

        self.store.set(&cache_key, json, ttl).await?;
        debug!("Cache SET: {} (TTL: {:?})", cache_key, ttl);
        Ok(())
    }

    /// Delete a value from cache
    pub async fn delete(&self, category: &str, key: &str) -> ServiceResult<()> {
        let cache_key = self.build_key(category, key);
        debug!("Cache DELETE: {}", cache_key);
        self.store.delete(&cache_key).await
    }

    /// Write, read back and delete a probe key
    pub async fn round_trip(&self) -> ServiceResult<()> {
        let probe = chrono::Utc::now().timestamp_millis().to_string();
        self.set(categories::HEALTH, "probe", &probe, Duration::from_secs(10))
            .await?;
        let read: Option<String> = self.get(categories::HEALTH, "probe").await?;
        self.delete(categories::HEALTH, "probe").await?;

        if read.as_deref() != Some(probe.as_str()) {
            return Err(ServiceError::Internal(
                "Cache round-trip returned a different value".to_string(),
            ));
        }

        Ok(())
    }

    /// Ping the backend
    pub async fn ping(&self) -> ServiceResult<()> {
        self.store.ping().await
    }
}

/// Cache category constants
pub mod categories {
    pub const ACCOUNT: &str = "account:";
    pub const HEALTH: &str = "health:";
}
