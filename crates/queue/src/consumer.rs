//! Queue consumer trait and types.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// A raw message received from a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Unique message identifier from the queue provider.
    pub id: String,
    /// Raw message body.
    pub body: String,
    /// String-valued message attributes (routing metadata).
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Provider-specific handle for ack/nack (e.g., SQS receipt handle).
    pub receipt_handle: String,
    /// When the message was sent to the queue.
    pub timestamp: DateTime<Utc>,
    /// Number of times this message has been received.
    pub attempt_count: u32,
}

impl QueueMessage {
    /// Message with a body and no attributes, as sent by the scheduler.
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            receipt_handle: id.clone(),
            id,
            body: body.into(),
            attributes: HashMap::new(),
            timestamp: Utc::now(),
            attempt_count: 1,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Trait for queue consumer backends.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Poll up to `max_messages` from the queue.
    ///
    /// May block for up to the provider's long-poll timeout.
    /// Returns an empty vec if no messages are available.
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError>;

    /// Acknowledge successful processing; removes the message from the queue.
    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Return the message to the queue for redelivery.
    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError>;
}
