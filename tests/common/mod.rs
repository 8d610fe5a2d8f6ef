//! Shared fixtures for integration tests

#![allow(dead_code)]

use account_coordinator::{
    account::{AccountView, RegisterRequest},
    cache::MemoryCacheStore,
    config::ServerConfig,
    db,
    events::MemoryBus,
    AppContext,
};
use std::sync::Arc;

/// Context over in-process backends with handles to observe them
pub struct TestHarness {
    pub ctx: AppContext,
    pub bus: Arc<MemoryBus>,
    pub cache: Arc<MemoryCacheStore>,
}

impl TestHarness {
    pub async fn new() -> Self {
        let pool = db::create_memory_pool().await.unwrap();
        Self::with_pool(pool).await
    }

    /// File-backed pool with several connections, for concurrency tests
    pub async fn file_backed(dir: &tempfile::TempDir) -> Self {
        let mut config = ServerConfig::for_tests();
        config.storage.database_path = dir.path().join("accounts.sqlite");
        config.storage.max_connections = 8;

        let pool = db::create_pool(
            &config.storage.database_path,
            db::DatabaseOptions {
                max_connections: config.storage.max_connections,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        Self::build(config, pool).await
    }

    async fn with_pool(pool: sqlx::SqlitePool) -> Self {
        Self::build(ServerConfig::for_tests(), pool).await
    }

    async fn build(config: ServerConfig, pool: sqlx::SqlitePool) -> Self {
        let bus = Arc::new(MemoryBus::default());
        let cache = Arc::new(MemoryCacheStore::new());
        let ctx = AppContext::from_parts(config, pool, cache.clone(), bus.clone())
            .await
            .unwrap();
        Self { ctx, bus, cache }
    }

    /// Register an account and return its id and session token
    pub async fn register(&self, email: &str) -> (String, String) {
        let response = self
            .ctx
            .account_manager
            .register(RegisterRequest {
                email: email.to_string(),
                password: "password123".to_string(),
                display_name: Some("Test User".to_string()),
            })
            .await
            .unwrap();
        (response.account.id, response.token)
    }

    pub async fn view(&self, id: &str) -> AccountView {
        self.ctx.account_manager.get_account(id).await.unwrap()
    }

    pub fn routing_keys(&self) -> Vec<String> {
        self.bus
            .messages()
            .into_iter()
            .map(|m| m.routing_key)
            .collect()
    }
}
