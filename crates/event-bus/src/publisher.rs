//! At-least-once event publication with dead-letter fallback.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use resilience::{RetryPolicy, retry};
use serde::Serialize;
use serde_json::json;

use crate::broker::Broker;
use crate::envelope::{EventEnvelope, Version};
use crate::error::{PublishError, Result};
use crate::topic::Topic;

/// Request-scoped values copied into every envelope.
#[derive(Debug, Clone, Default)]
pub struct PublishContext {
    pub correlation_id: Option<String>,
    pub user_id: String,
    pub tenant_id: String,
}

impl PublishContext {
    pub fn new(correlation_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            user_id: user_id.into(),
            tenant_id: String::new(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }
}

/// Where an event ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered { attempts: u32 },
    DeadLettered { attempts: u32, error: String },
}

impl PublishOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Default bound on the number of aggregates a [`VersionSequencer`] tracks.
pub const DEFAULT_SEQUENCER_CAPACITY: usize = 10_000;

/// Hands out monotonic per-aggregate versions starting at 1.
///
/// For aggregates that carry no persisted version. Counters are kept in two
/// generations of at most `capacity / 2` entries each; when the current one
/// fills up the previous one is dropped, so an aggregate that stayed idle for
/// a whole generation starts over at 1. Counters live in memory only and
/// restart with the process.
#[derive(Debug)]
pub struct VersionSequencer {
    capacity: usize,
    generations: Mutex<Generations>,
}

#[derive(Debug, Default)]
struct Generations {
    current: HashMap<String, i64>,
    previous: HashMap<String, i64>,
}

impl Default for VersionSequencer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SEQUENCER_CAPACITY)
    }
}

impl VersionSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            generations: Mutex::default(),
        }
    }

    pub fn next(&self, aggregate_id: &str) -> Version {
        let mut guard = self.generations.lock();
        let generations = &mut *guard;

        let last = match generations.current.get(aggregate_id) {
            Some(version) => *version,
            None => {
                let last = generations.previous.remove(aggregate_id).unwrap_or(0);
                if generations.current.len() >= self.capacity / 2 {
                    generations.previous = std::mem::take(&mut generations.current);
                }
                last
            }
        };
        generations.current.insert(aggregate_id.to_string(), last + 1);
        Version::new(last + 1)
    }

    pub fn current(&self, aggregate_id: &str) -> Version {
        let generations = self.generations.lock();
        generations
            .current
            .get(aggregate_id)
            .or_else(|| generations.previous.get(aggregate_id))
            .copied()
            .map(Version::new)
            .unwrap_or_else(Version::initial)
    }

    /// Number of aggregates currently tracked.
    pub fn len(&self) -> usize {
        let generations = self.generations.lock();
        generations.current.len() + generations.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Wraps payloads in [`EventEnvelope`]s and publishes them.
///
/// A failed publish is retried per the [`RetryPolicy`]; once exhausted the
/// envelope goes to the domain's dead-letter topic with the same `event_id`.
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn Broker>,
    source: String,
    policy: RetryPolicy,
    versions: Arc<VersionSequencer>,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("source", &self.source)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl EventPublisher {
    pub fn new(broker: Arc<dyn Broker>, source: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            broker,
            source: source.into(),
            policy,
            versions: Arc::new(VersionSequencer::new()),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn versions(&self) -> &VersionSequencer {
        &self.versions
    }

    /// Builds the envelope for `payload` without publishing it, versioned by
    /// the in-process sequencer.
    pub fn envelope<P: Serialize>(
        &self,
        topic: Topic,
        aggregate_id: &str,
        aggregate_type: &str,
        payload: &P,
        ctx: &PublishContext,
    ) -> Result<EventEnvelope> {
        let version = self.versions.next(aggregate_id);
        self.envelope_at(topic, aggregate_id, aggregate_type, version, payload, ctx)
    }

    /// Builds the envelope for `payload` at a version the caller derived from
    /// the aggregate's own state.
    pub fn envelope_at<P: Serialize>(
        &self,
        topic: Topic,
        aggregate_id: &str,
        aggregate_type: &str,
        version: Version,
        payload: &P,
        ctx: &PublishContext,
    ) -> Result<EventEnvelope> {
        let mut builder = EventEnvelope::builder()
            .event_type(topic.event_type())
            .aggregate_id(aggregate_id)
            .aggregate_type(aggregate_type)
            .version(version)
            .source(self.source.as_str())
            .user_id(ctx.user_id.as_str())
            .tenant_id(ctx.tenant_id.as_str())
            .data(payload)?;
        if let Some(correlation_id) = &ctx.correlation_id {
            builder = builder.correlation_id(correlation_id.as_str());
        }
        builder.try_build().map_err(PublishError::Incomplete)
    }

    /// Publishes `payload` on `topic`.
    ///
    /// Returns `Err` only when both the topic and its dead-letter topic
    /// refused the event.
    #[tracing::instrument(skip(self, topic, payload, ctx), fields(topic = %topic))]
    pub async fn publish<P: Serialize>(
        &self,
        topic: Topic,
        aggregate_id: &str,
        aggregate_type: &str,
        payload: &P,
        ctx: &PublishContext,
    ) -> Result<PublishOutcome> {
        let envelope = self.envelope(topic, aggregate_id, aggregate_type, payload, ctx)?;
        self.publish_envelope(topic, envelope).await
    }

    /// Publishes `payload` at `version` instead of drawing one from the
    /// sequencer. Used by aggregates whose version survives a restart.
    #[tracing::instrument(skip(self, topic, payload, ctx), fields(topic = %topic, %version))]
    pub async fn publish_at<P: Serialize>(
        &self,
        topic: Topic,
        aggregate_id: &str,
        aggregate_type: &str,
        version: Version,
        payload: &P,
        ctx: &PublishContext,
    ) -> Result<PublishOutcome> {
        let envelope =
            self.envelope_at(topic, aggregate_id, aggregate_type, version, payload, ctx)?;
        self.publish_envelope(topic, envelope).await
    }

    /// Publishes a prepared envelope with retry and dead-letter fallback.
    pub async fn publish_envelope(
        &self,
        topic: Topic,
        envelope: EventEnvelope,
    ) -> Result<PublishOutcome> {
        let name = topic.name();
        let broker = &self.broker;
        let topic_ref = name.as_str();
        let env = &envelope;

        let mut attempts = 0;
        let result = retry(&self.policy, "publish", |attempt| {
            attempts = attempt;
            async move { broker.publish(topic_ref, env).await }
        })
        .await;

        match result {
            Ok(()) => {
                metrics::counter!("events_published_total", "topic" => name.clone()).increment(1);
                tracing::debug!(event_id = %envelope.event_id, attempts, "event delivered");
                Ok(PublishOutcome::Delivered { attempts })
            }
            Err(exhausted) => {
                let error = exhausted.last_error.to_string();
                self.dead_letter(topic, envelope, exhausted.attempts, error)
                    .await
            }
        }
    }

    async fn dead_letter(
        &self,
        topic: Topic,
        envelope: EventEnvelope,
        attempts: u32,
        error: String,
    ) -> Result<PublishOutcome> {
        let original = topic.name();
        let dlq = topic.dead_letter();
        let event_id = envelope.event_id;

        let mut dead = envelope;
        dead.metadata
            .extra
            .insert("original_topic".into(), json!(original));
        dead.metadata.extra.insert("error".into(), json!(error));
        dead.metadata
            .extra
            .insert("attempts".into(), json!(attempts));

        tracing::warn!(%event_id, topic = %original, attempts, %error, "routing event to dead-letter topic");

        match self.broker.publish(&dlq, &dead).await {
            Ok(()) => {
                metrics::counter!("events_dead_lettered_total", "topic" => original).increment(1);
                Ok(PublishOutcome::DeadLettered { attempts, error })
            }
            Err(dlq_error) => {
                tracing::error!(%event_id, topic = %original, error = %dlq_error, "dead-letter publish failed");
                Err(PublishError::Undeliverable {
                    topic: original,
                    event_id: event_id.to_string(),
                    error: dlq_error.to_string(),
                })
            }
        }
    }
}
