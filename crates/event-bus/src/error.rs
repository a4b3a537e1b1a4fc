use thiserror::Error;

/// Errors reported by a broker for a single publish attempt.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// The broker could not be reached.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The broker refused the message.
    #[error("broker rejected message: {0}")]
    Rejected(String),
}

/// Errors returned by [`crate::EventPublisher`].
#[derive(Debug, Error)]
pub enum PublishError {
    /// Neither the topic nor its dead-letter topic accepted the event.
    #[error("event {event_id} undeliverable to {topic} and its dead-letter topic: {error}")]
    Undeliverable {
        topic: String,
        event_id: String,
        error: String,
    },

    /// The payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A required envelope field was missing.
    #[error("incomplete envelope: missing {0}")]
    Incomplete(&'static str),
}

pub type Result<T> = std::result::Result<T, PublishError>;
