/// Message bus interface and the in-process implementation
use crate::error::{ServiceError, ServiceResult};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex,
};

/// Durable topic-based transport
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Declare `topic` durable; idempotent
    async fn ensure_durable_topic(&self, topic: &str) -> ServiceResult<()>;

    /// Returns Ok(false) when the transport is disconnected
    async fn publish(
        &self,
        topic: &str,
        routing_key: &str,
        payload: &str,
        persistent: bool,
    ) -> ServiceResult<bool>;

    /// Whether the transport is currently connected
    async fn health_probe(&self) -> bool;

    /// Re-open the connection after a failure
    async fn reconnect(&self) -> ServiceResult<()>;

    async fn close(&self);
}

/// A message accepted by [`MemoryBus`]
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub routing_key: String,
    pub payload: serde_json::Value,
    pub persistent: bool,
}

/// In-process bus retaining the most recent messages
///
/// Used when no broker is configured, and by tests to observe emitted
/// events and to simulate an unreachable broker.
pub struct MemoryBus {
    capacity: usize,
    messages: Mutex<VecDeque<PublishedMessage>>,
    topics: Mutex<HashSet<String>>,
    connected: AtomicBool,
    reachable: AtomicBool,
    declarations: AtomicUsize,
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            messages: Mutex::new(VecDeque::new()),
            topics: Mutex::new(HashSet::new()),
            connected: AtomicBool::new(true),
            reachable: AtomicBool::new(true),
            declarations: AtomicUsize::new(0),
        }
    }

    /// Drop the connection; `reconnect` fails until `set_reachable(true)`
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.reachable.store(false, Ordering::SeqCst);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Messages accepted so far, oldest first
    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages
            .lock()
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages accepted under one routing key
    pub fn messages_for(&self, routing_key: &str) -> Vec<PublishedMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.routing_key == routing_key)
            .collect()
    }

    /// Number of `ensure_durable_topic` calls so far
    pub fn declarations(&self) -> usize {
        self.declarations.load(Ordering::SeqCst)
    }

    fn lock_error<T>(_: T) -> ServiceError {
        ServiceError::Internal("Memory bus lock poisoned".to_string())
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn ensure_durable_topic(&self, topic: &str) -> ServiceResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ServiceError::Internal("Memory bus is disconnected".to_string()));
        }
        self.topics
            .lock()
            .map_err(Self::lock_error)?
            .insert(topic.to_string());
        self.declarations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        routing_key: &str,
        payload: &str,
        persistent: bool,
    ) -> ServiceResult<bool> {
        if !self.connected.load(Ordering::SeqCst) {
            return Ok(false);
        }

        if !self.topics.lock().map_err(Self::lock_error)?.contains(topic) {
            return Err(ServiceError::Internal(format!(
                "Topic {} has not been declared",
                topic
            )));
        }

        let payload = serde_json::from_str(payload)
            .map_err(|e| ServiceError::Internal(format!("Payload is not JSON: {}", e)))?;

        let mut messages = self.messages.lock().map_err(Self::lock_error)?;
        if messages.len() == self.capacity {
            messages.pop_front();
        }
        messages.push_back(PublishedMessage {
            topic: topic.to_string(),
            routing_key: routing_key.to_string(),
            payload,
            persistent,
        });

        Ok(true)
    }

    async fn health_probe(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> ServiceResult<()> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(ServiceError::Internal("Memory bus is unreachable".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}
