//! Event bus abstraction for order and payment events
//!
//! The `EventBus` trait provides at-least-once, ordered-by-key publication
//! and consumer-group reads. The production implementation publishes to NATS
//! JetStream with one subject per message key; the in-memory implementation
//! fans messages out to per-group channels for tests.
//!
//! Consumers receive messages through a channel; delivery into the channel
//! acknowledges the message, so handler failures are logged by the consumer
//! loops rather than redelivered.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod memory;
pub mod nats;

pub use memory::MemoryEventBus;
pub use nats::NatsEventBus;

/// Result type for event bus operations
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Errors reported by the event bus
#[derive(Error, Debug)]
pub enum EventBusError {
    /// The bus cannot be reached or rejected the publication
    #[error("event bus unavailable: {message}")]
    Unavailable { message: String },

    /// A consumer group could not be established
    #[error("consumer group {group} failed: {message}")]
    Consumer { group: String, message: String },
}

impl EventBusError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn consumer(group: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Consumer {
            group: group.into(),
            message: message.into(),
        }
    }
}

/// A message as observed by a consumer group
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Ordering key the message was published under
    pub key: String,
    /// Application headers (`message_type`, `order_id`)
    pub headers: HashMap<String, String>,
    /// Raw JSON payload
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// Look up a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Ordered-by-key, at-least-once event channel with consumer groups
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a message under an ordering key. Returns once the bus has
    /// acknowledged the write.
    async fn publish(
        &self,
        key: &str,
        headers: &[(&str, &str)],
        payload: &[u8],
    ) -> EventBusResult<()>;

    /// Join a consumer group and receive every subsequent message once per
    /// group. The subscription ends when the receiver is dropped.
    async fn subscribe(&self, group: &str) -> EventBusResult<mpsc::UnboundedReceiver<BusMessage>>;
}
