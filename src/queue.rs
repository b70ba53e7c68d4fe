//! The transport seam: anything that can hand out messages, publish them and acknowledge them.

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::trail::Trail;
use async_trait::async_trait;
use std::sync::Arc;

/// A message body. Well-formed messages are JSON objects.
pub type Message = serde_json::Value;

/// Opaque token confirming consumption of one message (the AMQP delivery tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AckHandle(pub u64);

/// One message fetched from a queue.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: Message,
    pub ack: AckHandle,
    /// The trail the message was published under, if the transport carried one.
    pub trail: Option<Trail>,
}

impl Delivery {
    pub fn new(message: Message, ack: AckHandle) -> Self {
        Self {
            message,
            ack,
            trail: None,
        }
    }

    pub fn with_trail(mut self, trail: Trail) -> Self {
        self.trail = Some(trail);
        self
    }
}

/// A message source and sink.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Waits for the next message. `Ok(None)` means the transport's wait elapsed
    /// without anything to consume.
    async fn get(&self) -> Result<Option<Delivery>, WorkerError>;

    /// Publishes `message` with `routing_key` on `exchange` (`""` is the default
    /// exchange, where the routing key names a queue).
    async fn put(
        &self,
        message: &Message,
        routing_key: &str,
        exchange: &str,
        trail: Option<&Trail>,
    ) -> Result<(), WorkerError>;

    /// Acknowledges a message previously returned by `get`.
    async fn ack(&self, ack: AckHandle) -> Result<(), WorkerError>;

    /// Hands a message back to the transport unacknowledged, so it is
    /// delivered again.
    async fn reject(&self, ack: AckHandle) -> Result<(), WorkerError>;

    /// Releases the underlying connection. Unacknowledged messages go back to
    /// the broker.
    async fn close(&self) -> Result<(), WorkerError> {
        Ok(())
    }
}

/// Opens queues for a worker, initially and again after a crash.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &WorkerConfig) -> Result<Arc<dyn Queue>, WorkerError>;
}
