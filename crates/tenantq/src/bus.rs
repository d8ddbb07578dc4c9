//! In-process topic pub/sub for job lifecycle events.
//!
//! Delivery is best-effort, in-memory and non-durable: subscribers that
//! need history must keep their own. Within a topic, delivery follows
//! publish order on the publishing task; there is no cross-topic order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use serde_json::Value;

/// Topics carried by the bus, one per job state transition plus the
/// metrics refresh signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    JobSubmitted,
    JobStarted,
    JobCompleted,
    JobFailed,
    JobRetry,
    JobDlq,
    MetricsUpdated,
}

impl Topic {
    pub const ALL: [Topic; 7] = [
        Topic::JobSubmitted,
        Topic::JobStarted,
        Topic::JobCompleted,
        Topic::JobFailed,
        Topic::JobRetry,
        Topic::JobDlq,
        Topic::MetricsUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::JobSubmitted => "job_submitted",
            Topic::JobStarted => "job_started",
            Topic::JobCompleted => "job_completed",
            Topic::JobFailed => "job_failed",
            Topic::JobRetry => "job_retry",
            Topic::JobDlq => "job_dlq",
            Topic::MetricsUpdated => "metrics_updated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberId(u64);

type Handler = Arc<dyn Fn(Topic, Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Topic-keyed subscriber registry. Cloneable; clones share the registry.
///
/// `publish` awaits every handler in turn and a failing handler is
/// logged and skipped, never unwinding into the publisher or starving
/// the remaining subscribers. No backpressure: slow subscribers must
/// buffer or drop on their side.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<Topic, Vec<(SubscriberId, Handler)>>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriberId
    where
        F: Fn(Topic, Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.subscribers.write().expect("bus registry poisoned");
        subscribers
            .entry(topic)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Register one handler on every topic (the shape the live update
    /// stream wants). Returns the ids in `Topic::ALL` order.
    pub fn subscribe_all<F>(&self, handler: F) -> Vec<SubscriberId>
    where
        F: Fn(Topic, Value) -> BoxFuture<'static, anyhow::Result<()>>
            + Send
            + Sync
            + Clone
            + 'static,
    {
        Topic::ALL
            .iter()
            .map(|topic| self.subscribe(*topic, handler.clone()))
            .collect()
    }

    pub fn unsubscribe(&self, topic: Topic, id: SubscriberId) {
        let mut subscribers = self.subscribers.write().expect("bus registry poisoned");
        if let Some(handlers) = subscribers.get_mut(&topic) {
            handlers.retain(|(existing, _)| *existing != id);
        }
    }

    pub async fn publish(&self, topic: Topic, payload: Value) {
        let handlers: Vec<Handler> = {
            let subscribers = self.subscribers.read().expect("bus registry poisoned");
            subscribers
                .get(&topic)
                .map(|entries| entries.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };

        for handler in handlers {
            if let Err(err) = handler(topic, payload.clone()).await {
                tracing::warn!(
                    topic = topic.as_str(),
                    error = %err,
                    "event handler failed, continuing fan-out"
                );
            }
        }
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        let subscribers = self.subscribers.read().expect("bus registry poisoned");
        subscribers.get(&topic).map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn collector() -> (
        Arc<Mutex<Vec<(Topic, Value)>>>,
        impl Fn(Topic, Value) -> BoxFuture<'static, anyhow::Result<()>> + Clone,
    ) {
        let seen: Arc<Mutex<Vec<(Topic, Value)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = move |topic: Topic, payload: Value| {
            let sink = sink.clone();
            let fut: BoxFuture<'static, anyhow::Result<()>> = Box::pin(async move {
                sink.lock().unwrap().push((topic, payload));
                Ok(())
            });
            fut
        };
        (seen, handler)
    }

    #[tokio::test]
    async fn publish_reaches_all_topic_subscribers() {
        let bus = EventBus::new();
        let (seen_a, handler_a) = collector();
        let (seen_b, handler_b) = collector();

        bus.subscribe(Topic::JobSubmitted, handler_a);
        bus.subscribe(Topic::JobSubmitted, handler_b);

        bus.publish(Topic::JobSubmitted, json!({"job_id": "j1"})).await;

        assert_eq!(seen_a.lock().unwrap().len(), 1);
        assert_eq!(seen_b.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = EventBus::new();
        let (seen, handler) = collector();

        bus.subscribe(Topic::JobCompleted, handler);
        bus.publish(Topic::JobFailed, json!({})).await;

        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (seen, handler) = collector();

        let id = bus.subscribe(Topic::JobRetry, handler);
        bus.publish(Topic::JobRetry, json!({"n": 1})).await;

        bus.unsubscribe(Topic::JobRetry, id);
        bus.publish(Topic::JobRetry, json!({"n": 2})).await;

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(bus.subscriber_count(Topic::JobRetry), 0);
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_others() {
        let bus = EventBus::new();
        let (seen, handler) = collector();

        bus.subscribe(Topic::JobDlq, |_, _| {
            Box::pin(async { anyhow::bail!("subscriber broke") })
        });
        bus.subscribe(Topic::JobDlq, handler);

        bus.publish(Topic::JobDlq, json!({"job_id": "j9"})).await;

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn per_topic_publish_order_is_preserved() {
        let bus = EventBus::new();
        let (seen, handler) = collector();

        bus.subscribe(Topic::JobStarted, handler);
        for n in 0..5 {
            bus.publish(Topic::JobStarted, json!({"n": n})).await;
        }

        let seen = seen.lock().unwrap();
        let ns: Vec<i64> = seen.iter().map(|(_, v)| v["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn subscribe_all_covers_every_topic() {
        let bus = EventBus::new();
        let (seen, handler) = collector();

        let ids = bus.subscribe_all(handler);
        assert_eq!(ids.len(), Topic::ALL.len());

        for topic in Topic::ALL {
            bus.publish(topic, json!({})).await;
        }
        assert_eq!(seen.lock().unwrap().len(), Topic::ALL.len());
    }
}
