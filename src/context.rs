/// Application context and dependency injection
///
/// The cache and message-bus connections are opened once here and closed
/// in [`AppContext::shutdown`]. Tests build a context from in-process
/// backends with [`AppContext::from_parts`].
use crate::{
    account::{AccountManager, AccountStore},
    auth::{AccessGuard, TokenService},
    cache::{CacheClient, CacheStore, MemoryCacheStore, RedisCacheStore},
    config::ServerConfig,
    crypto::PasswordHasher,
    db,
    devices::DeviceTokenRegistry,
    error::ServiceResult,
    events::{EventPublisher, MemoryBus, MessageBus, RedisStreamBus},
    preferences::PreferenceManager,
};
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub cache: CacheClient,
    pub guard: AccessGuard,
    pub tokens: TokenService,
    pub events: Arc<EventPublisher>,
    pub account_store: Arc<AccountStore>,
    pub account_manager: Arc<AccountManager>,
    pub preference_manager: Arc<PreferenceManager>,
    pub device_registry: Arc<DeviceTokenRegistry>,
    pub started_at: Instant,
    reconnect_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> ServiceResult<Self> {
        config.validate()?;

        let pool = if config.storage.database_path.as_os_str() == ":memory:" {
            db::create_memory_pool().await?
        } else {
            db::create_pool(
                &config.storage.database_path,
                db::DatabaseOptions {
                    max_connections: config.storage.max_connections,
                    ..Default::default()
                },
            )
            .await?
        };

        let cache_store: Arc<dyn CacheStore> = if config.cache.enabled {
            Arc::new(RedisCacheStore::connect(&config.cache.redis_url).await?)
        } else {
            info!("Redis cache disabled; using in-process account cache");
            Arc::new(MemoryCacheStore::new())
        };

        let bus: Arc<dyn MessageBus> = if config.events.enabled {
            Arc::new(RedisStreamBus::connect(&config.events.redis_url).await?)
        } else {
            info!("Event stream disabled; events stay in process");
            Arc::new(MemoryBus::default())
        };

        Self::from_parts(config, pool, cache_store, bus).await
    }

    /// Wire services over already-open backends
    pub async fn from_parts(
        config: ServerConfig,
        pool: SqlitePool,
        cache_store: Arc<dyn CacheStore>,
        bus: Arc<dyn MessageBus>,
    ) -> ServiceResult<Self> {
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        let cache = CacheClient::new(cache_store, config.cache.key_prefix.clone());

        let events = Arc::new(EventPublisher::new(
            bus,
            config.events.topic.clone(),
            config.service.name.clone(),
            config.service.version.clone(),
        ));
        if !events.start().await {
            warn!("Message bus unavailable at startup; events will be dropped until it reconnects");
        }

        let tokens = TokenService::new(
            &config.authentication.jwt_secret,
            config.authentication.token_ttl_secs,
        );
        let guard = AccessGuard::new(tokens.clone(), &config.authentication.internal_api_key);
        let hasher = PasswordHasher::new(
            config.authentication.password_hash_memory_kib,
            config.authentication.password_hash_iterations,
        )?;

        let account_store = Arc::new(AccountStore::new(
            pool.clone(),
            cache.clone(),
            Duration::from_secs(config.cache.account_ttl_secs),
        ));
        let preference_manager = Arc::new(PreferenceManager::new(
            account_store.clone(),
            events.clone(),
        ));
        let device_registry = Arc::new(DeviceTokenRegistry::new(
            account_store.clone(),
            events.clone(),
        ));
        let account_manager = Arc::new(AccountManager::new(
            account_store.clone(),
            preference_manager.clone(),
            tokens.clone(),
            hasher,
            events.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            db: pool,
            cache,
            guard,
            tokens,
            events,
            account_store,
            account_manager,
            preference_manager,
            device_registry,
            started_at: Instant::now(),
            reconnect_task: Arc::new(Mutex::new(None)),
        })
    }

    /// Start the message-bus reconnect loop
    pub fn start_background_tasks(&self) {
        let every = Duration::from_secs(self.config.events.reconnect_interval_secs.max(1));
        let handle = self.events.spawn_reconnect_loop(every);

        if let Ok(mut slot) = self.reconnect_task.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Drain in-flight events, close the bus and the database pool
    pub async fn shutdown(&self) {
        let task = self.reconnect_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            task.abort();
        }

        self.events
            .shutdown(Duration::from_secs(self.config.events.drain_timeout_secs))
            .await;
        self.db.close().await;
        info!("Application context shut down");
    }
}
