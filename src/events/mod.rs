/// Best-effort event emission
///
/// Every committed mutation is announced on a durable topic. Publishing
/// never fails the caller: a disconnected or failing transport yields
/// `false` and a warning, and the event is dropped. Nothing is queued for
/// later delivery.

mod redis_stream;
mod transport;
pub mod types;

pub use redis_stream::{RedisStreamBus, RETENTION_GROUP};
pub use transport::{MemoryBus, MessageBus, PublishedMessage};
pub use types::{routing_keys, DomainEvent};

use crate::metrics;
use chrono::{SecondsFormat, Utc};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Fans mutation notifications out to the message bus
pub struct EventPublisher {
    bus: Arc<dyn MessageBus>,
    topic: String,
    source: String,
    version: String,
    in_flight: AtomicUsize,
    drained: Notify,
    closing: AtomicBool,
    bus_up: AtomicBool,
}

/// Decrements the in-flight count when a publish finishes
struct InFlight<'a>(&'a EventPublisher);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        metrics::EVENTS_IN_FLIGHT.dec();
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}

impl EventPublisher {
    /// `source` and `version` are stamped on every envelope
    pub fn new(
        bus: Arc<dyn MessageBus>,
        topic: impl Into<String>,
        source: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            topic: topic.into(),
            source: source.into(),
            version: version.into(),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            closing: AtomicBool::new(false),
            bus_up: AtomicBool::new(false),
        }
    }

    /// Declare the topic; failure leaves the publisher in dropping mode
    pub async fn start(&self) -> bool {
        let up = self.bus.health_probe().await && self.declare_topic().await;
        self.set_bus_up(up);
        up
    }

    async fn declare_topic(&self) -> bool {
        match self.bus.ensure_durable_topic(&self.topic).await {
            Ok(()) => true,
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "Failed to declare event topic");
                false
            }
        }
    }

    fn set_bus_up(&self, up: bool) {
        self.bus_up.store(up, Ordering::SeqCst);
        metrics::set_event_bus_connected(up);
    }

    /// Publish a typed event
    pub async fn emit<E: DomainEvent>(&self, event: &E) -> bool {
        let routing_key = event.routing_key();
        match serde_json::to_value(event) {
            Ok(payload) => self.publish(routing_key, payload).await,
            Err(e) => {
                warn!(routing_key, error = %e, "Failed to serialize event");
                metrics::record_event_publish(routing_key, false);
                false
            }
        }
    }

    /// Wrap `payload` in the standard envelope and hand it to the bus
    ///
    /// Returns whether the bus accepted the message.
    pub async fn publish(&self, routing_key: &str, payload: serde_json::Value) -> bool {
        let _guard = self.track();

        if self.closing.load(Ordering::SeqCst) {
            warn!(routing_key, "Event publisher is shutting down; event dropped");
            metrics::record_event_publish(routing_key, false);
            return false;
        }

        let body = self.envelope(payload).to_string();
        let delivered = match self.bus.publish(&self.topic, routing_key, &body, true).await {
            Ok(true) => {
                debug!(routing_key, "Event published");
                true
            }
            Ok(false) => {
                warn!(routing_key, "Message bus not connected; event dropped");
                false
            }
            Err(e) => {
                warn!(routing_key, error = %e, "Failed to publish event");
                false
            }
        };

        metrics::record_event_publish(routing_key, delivered);
        delivered
    }

    fn track(&self) -> InFlight<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        metrics::EVENTS_IN_FLIGHT.inc();
        InFlight(self)
    }

    /// Envelope fields override same-named payload fields
    fn envelope(&self, payload: serde_json::Value) -> serde_json::Value {
        let mut object = match payload {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };

        object.insert(
            "timestamp".to_string(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true).into(),
        );
        object.insert("source".to_string(), self.source.clone().into());
        object.insert("version".to_string(), self.version.clone().into());
        serde_json::Value::Object(object)
    }

    /// Probe the bus, reconnecting and re-declaring the topic when it comes back
    ///
    /// Returns whether the bus is up after the check.
    pub async fn check_connection(&self) -> bool {
        let was_up = self.bus_up.load(Ordering::SeqCst);
        let mut up = self.bus.health_probe().await;

        if !up {
            if was_up {
                warn!("Message bus connection lost; events will be dropped until it returns");
            }
            match self.bus.reconnect().await {
                Ok(()) => up = self.bus.health_probe().await,
                Err(e) => debug!(error = %e, "Message bus reconnect attempt failed"),
            }
        }

        if up && !was_up {
            up = self.declare_topic().await;
            if up {
                info!(topic = %self.topic, "Message bus reconnected; topic re-declared");
            }
        }

        self.set_bus_up(up);
        up
    }

    /// Background loop running [`check_connection`](Self::check_connection)
    pub fn spawn_reconnect_loop(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let publisher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if publisher.closing.load(Ordering::SeqCst) {
                    break;
                }
                publisher.check_connection().await;
            }
        })
    }

    /// Whether the bus is currently connected
    pub async fn is_healthy(&self) -> bool {
        self.bus.health_probe().await
    }

    /// Number of publishes currently in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Refuse new publishes, wait up to `timeout` for in-flight ones, close the bus
    pub async fn shutdown(&self, timeout: Duration) {
        self.closing.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + timeout;

        loop {
            let drained = self.drained.notified();
            let remaining = self.in_flight.load(Ordering::SeqCst);
            if remaining == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, drained).await.is_err() {
                warn!(remaining, "Timed out draining in-flight events");
                break;
            }
        }

        self.bus.close().await;
        self.set_bus_up(false);
        info!("Event publisher shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceResult;
    use async_trait::async_trait;

    async fn publisher() -> (Arc<MemoryBus>, EventPublisher) {
        let bus = Arc::new(MemoryBus::new(100));
        let publisher = EventPublisher::new(bus.clone(), "account.events", "account-service", "1.0.0");
        assert!(publisher.start().await);
        (bus, publisher)
    }

    #[tokio::test]
    async fn test_envelope_fields_added() {
        let (bus, publisher) = publisher().await;

        let delivered = publisher
            .publish("account.created", serde_json::json!({"accountId": "a", "source": "spoofed"}))
            .await;
        assert!(delivered);

        let messages = bus.messages_for("account.created");
        assert_eq!(messages.len(), 1);
        let payload = &messages[0].payload;
        assert_eq!(payload["accountId"], "a");
        assert_eq!(payload["source"], "account-service");
        assert_eq!(payload["version"], "1.0.0");
        assert!(payload["timestamp"].as_str().unwrap().ends_with('Z'));
        assert_eq!(messages[0].topic, "account.events");
        assert!(messages[0].persistent);
    }

    #[tokio::test]
    async fn test_disconnected_publish_returns_false() {
        let (bus, publisher) = publisher().await;
        bus.disconnect();

        assert!(!publisher.publish("account.created", serde_json::json!({})).await);
        assert!(bus.messages().is_empty());
        assert_eq!(publisher.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_redeclares_topic() {
        let (bus, publisher) = publisher().await;
        assert_eq!(bus.declarations(), 1);

        bus.disconnect();
        assert!(!publisher.check_connection().await);

        bus.set_reachable(true);
        assert!(publisher.check_connection().await);
        assert_eq!(bus.declarations(), 2);

        // Steady state does not re-declare
        assert!(publisher.check_connection().await);
        assert_eq!(bus.declarations(), 2);

        assert!(publisher.publish("account.updated", serde_json::json!({})).await);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_publishes() {
        let (bus, publisher) = publisher().await;
        publisher.shutdown(Duration::from_secs(1)).await;

        assert!(!publisher.publish("account.created", serde_json::json!({})).await);
        assert!(!bus.health_probe().await);
    }

    /// Bus whose publish blocks until released
    struct SlowBus {
        inner: MemoryBus,
        release: Notify,
    }

    #[async_trait]
    impl MessageBus for SlowBus {
        async fn ensure_durable_topic(&self, topic: &str) -> ServiceResult<()> {
            self.inner.ensure_durable_topic(topic).await
        }

        async fn publish(
            &self,
            topic: &str,
            routing_key: &str,
            payload: &str,
            persistent: bool,
        ) -> ServiceResult<bool> {
            self.release.notified().await;
            self.inner.publish(topic, routing_key, payload, persistent).await
        }

        async fn health_probe(&self) -> bool {
            self.inner.health_probe().await
        }

        async fn reconnect(&self) -> ServiceResult<()> {
            self.inner.reconnect().await
        }

        async fn close(&self) {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight() {
        let bus = Arc::new(SlowBus {
            inner: MemoryBus::new(10),
            release: Notify::new(),
        });
        let publisher = Arc::new(EventPublisher::new(bus.clone(), "t", "s", "v"));
        assert!(publisher.start().await);

        let pending = {
            let publisher = Arc::clone(&publisher);
            tokio::spawn(async move { publisher.publish("k", serde_json::json!({})).await })
        };

        while publisher.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let shutdown = {
            let publisher = Arc::clone(&publisher);
            tokio::spawn(async move { publisher.shutdown(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!shutdown.is_finished());

        bus.release.notify_one();
        assert!(pending.await.unwrap());
        shutdown.await.unwrap();

        assert_eq!(bus.inner.messages().len(), 1);
        assert!(!bus.inner.health_probe().await);
    }

    #[tokio::test]
    async fn test_shutdown_times_out() {
        let bus = Arc::new(SlowBus {
            inner: MemoryBus::new(10),
            release: Notify::new(),
        });
        let publisher = Arc::new(EventPublisher::new(bus.clone(), "t", "s", "v"));
        assert!(publisher.start().await);

        let _pending = {
            let publisher = Arc::clone(&publisher);
            tokio::spawn(async move { publisher.publish("k", serde_json::json!({})).await })
        };
        while publisher.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        publisher.shutdown(Duration::from_millis(20)).await;
        assert_eq!(publisher.in_flight(), 1);
    }
}
