/// Redis Streams message bus
///
/// A durable topic is a stream key with a consumer group attached, so the
/// stream exists before the first entry is added and entries are retained
/// for group consumers. Each message is one `XADD` entry.
use super::transport::MessageBus;
use crate::error::{ServiceError, ServiceResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Consumer group created alongside every durable topic
pub const RETENTION_GROUP: &str = "account-events";

pub struct RedisStreamBus {
    client: Client,
    connection: RwLock<Option<ConnectionManager>>,
    connected: AtomicBool,
}

impl RedisStreamBus {
    /// Create the bus and try to connect
    ///
    /// An unreachable broker is not fatal: the bus starts disconnected and
    /// the publisher's reconnect loop keeps trying.
    pub async fn connect(redis_url: &str) -> ServiceResult<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            error!("Failed to create Redis client for events: {}", e);
            ServiceError::Configuration(format!("Invalid events Redis URL: {}", e))
        })?;

        let bus = Self {
            client,
            connection: RwLock::new(None),
            connected: AtomicBool::new(false),
        };

        if let Err(e) = bus.reconnect().await {
            error!("Failed to connect to event stream: {}", e);
        }

        Ok(bus)
    }

    async fn current_connection(&self) -> Option<ConnectionManager> {
        if !self.connected.load(Ordering::SeqCst) {
            return None;
        }
        self.connection.read().await.clone()
    }

    fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!("Event stream connection lost");
        }
    }
}

#[async_trait]
impl MessageBus for RedisStreamBus {
    async fn ensure_durable_topic(&self, topic: &str) -> ServiceResult<()> {
        let mut conn = self
            .current_connection()
            .await
            .ok_or_else(|| ServiceError::Internal("Event stream is not connected".to_string()))?;

        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic)
            .arg(RETENTION_GROUP)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(()) => {
                info!("Declared durable topic {}", topic);
                Ok(())
            }
            // Group already exists: the topic was declared before
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => {
                self.mark_disconnected();
                Err(ServiceError::Internal(format!(
                    "Failed to declare topic {}: {}",
                    topic, e
                )))
            }
        }
    }

    async fn publish(
        &self,
        topic: &str,
        routing_key: &str,
        payload: &str,
        persistent: bool,
    ) -> ServiceResult<bool> {
        let Some(mut conn) = self.current_connection().await else {
            return Ok(false);
        };

        let delivery_mode = if persistent { "persistent" } else { "transient" };
        let fields = [
            ("routing_key", routing_key),
            ("payload", payload),
            ("content_type", "application/json"),
            ("delivery_mode", delivery_mode),
        ];

        let added: redis::RedisResult<String> = conn.xadd(topic, "*", &fields[..]).await;
        match added {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
                    self.mark_disconnected();
                }
                Err(ServiceError::Internal(format!("XADD to {} failed: {}", topic, e)))
            }
        }
    }

    async fn health_probe(&self) -> bool {
        let Some(mut conn) = self.current_connection().await else {
            return false;
        };

        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        match pong {
            Ok(_) => true,
            Err(e) => {
                warn!("Event stream PING failed: {}", e);
                self.mark_disconnected();
                false
            }
        }
    }

    async fn reconnect(&self) -> ServiceResult<()> {
        let connection = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| ServiceError::Internal(format!("Event stream connection failed: {}", e)))?;

        *self.connection.write().await = Some(connection);
        self.connected.store(true, Ordering::SeqCst);
        info!("Event stream connection established");
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.connection.write().await.take();
        info!("Disconnected from event stream");
    }
}
