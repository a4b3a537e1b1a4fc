//! Domain event publication.
//!
//! Every event travels in one [`EventEnvelope`] shape on a topic named
//! `ecommerce.{domain}.{action}`. [`EventPublisher`] retries failed publishes
//! and falls back to `ecommerce.dlq.{domain}`. Delivery is at-least-once;
//! consumers deduplicate on `event_id`.

pub mod broker;
pub mod envelope;
pub mod error;
pub mod publisher;
pub mod topic;

pub use broker::{Broker, InMemoryBroker, LogBroker};
pub use envelope::{EventEnvelope, EventEnvelopeBuilder, EventId, EventMetadata, Version};
pub use error::{BrokerError, PublishError, Result};
pub use publisher::{
    DEFAULT_SEQUENCER_CAPACITY, EventPublisher, PublishContext, PublishOutcome, VersionSequencer,
};
pub use topic::{Topic, dead_letter_topic, topics};
