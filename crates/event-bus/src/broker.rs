//! Broker abstraction and in-process implementations.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::envelope::EventEnvelope;
use crate::error::BrokerError;

/// A message broker accepting envelopes on named topics.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publishes one envelope. A returned `Ok` means the broker acknowledged it.
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), BrokerError>;
}

#[derive(Debug, Default)]
struct InMemoryBrokerState {
    messages: Vec<(String, EventEnvelope)>,
    fail_next: u32,
    failing_topics: HashSet<String>,
    attempts: u64,
}

/// In-memory broker for tests and local runs.
///
/// Clones share the same message log.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<InMemoryBrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` publish attempts fail regardless of topic.
    pub fn set_fail_next(&self, n: u32) {
        self.state.lock().fail_next = n;
    }

    /// Makes every publish to `topic` fail until cleared.
    pub fn set_topic_failing(&self, topic: impl Into<String>, failing: bool) {
        let topic = topic.into();
        let mut state = self.state.lock();
        if failing {
            state.failing_topics.insert(topic);
        } else {
            state.failing_topics.remove(&topic);
        }
    }

    /// Envelopes acknowledged on `topic`, in publish order.
    pub fn published(&self, topic: &str) -> Vec<EventEnvelope> {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Every acknowledged `(topic, envelope)` pair.
    pub fn all(&self) -> Vec<(String, EventEnvelope)> {
        self.state.lock().messages.clone()
    }

    pub fn count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|(t, _)| t == topic)
            .count()
    }

    /// Publish attempts seen, including failed ones.
    pub fn attempts(&self) -> u64 {
        self.state.lock().attempts
    }

    pub fn clear(&self) {
        self.state.lock().messages.clear();
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        state.attempts += 1;

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(BrokerError::Unavailable("injected failure".to_string()));
        }
        if state.failing_topics.contains(topic) {
            return Err(BrokerError::Unavailable(format!("topic {topic} failing")));
        }

        state.messages.push((topic.to_string(), envelope.clone()));
        Ok(())
    }
}

/// Broker that writes every envelope to the structured log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogBroker;

#[async_trait]
impl Broker for LogBroker {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), BrokerError> {
        let body = serde_json::to_string(envelope)
            .map_err(|e| BrokerError::Rejected(e.to_string()))?;
        tracing::info!(
            topic,
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            envelope = %body,
            "event published"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Version;

    fn envelope() -> EventEnvelope {
        EventEnvelope::builder()
            .event_type("order.created")
            .aggregate_id("order-1")
            .aggregate_type("Order")
            .version(Version::new(1))
            .source("test")
            .data_raw(serde_json::json!({}))
            .try_build()
            .unwrap()
    }

    #[tokio::test]
    async fn records_messages_per_topic() {
        let broker = InMemoryBroker::new();
        broker.publish("a", &envelope()).await.unwrap();
        broker.publish("b", &envelope()).await.unwrap();
        broker.publish("a", &envelope()).await.unwrap();

        assert_eq!(broker.count("a"), 2);
        assert_eq!(broker.published("b").len(), 1);
        assert_eq!(broker.all().len(), 3);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let broker = InMemoryBroker::new();
        broker.set_fail_next(1);

        assert!(broker.publish("a", &envelope()).await.is_err());
        assert!(broker.publish("a", &envelope()).await.is_ok());
        assert_eq!(broker.attempts(), 2);
    }

    #[tokio::test]
    async fn failing_topic_can_be_cleared() {
        let broker = InMemoryBroker::new();
        broker.set_topic_failing("a", true);
        assert!(broker.publish("a", &envelope()).await.is_err());
        assert!(broker.publish("b", &envelope()).await.is_ok());

        broker.set_topic_failing("a", false);
        assert!(broker.publish("a", &envelope()).await.is_ok());
    }

    #[tokio::test]
    async fn log_broker_acknowledges() {
        assert!(LogBroker.publish("a", &envelope()).await.is_ok());
    }
}
