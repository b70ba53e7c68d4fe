//! Quarantine for messages that fail validation or task construction.

use crate::queue::{AckHandle, Message, Queue};
use crate::trail::Trail;
use serde_json::json;

/// Suffix appended to a source queue name to form its garbage queue.
pub const GARBAGE_SUFFIX: &str = "_garbage";
/// Exchange used for garbage records: the broker's default exchange.
pub const DEFAULT_EXCHANGE: &str = "";

pub fn garbage_queue_name(queue_name: &str) -> String {
    format!("{}{}", queue_name, GARBAGE_SUFFIX)
}

/// The record published for a quarantined message.
pub fn garbage_record(reason: &str) -> Message {
    json!({ "garbage_reason": reason })
}

/// Routes bad messages of one source queue to its garbage queue.
#[derive(Clone, Debug)]
pub struct GarbageRoute {
    garbage_queue: String,
}

impl GarbageRoute {
    pub fn new(base_queue_name: &str) -> Self {
        Self {
            garbage_queue: garbage_queue_name(base_queue_name),
        }
    }

    pub fn garbage_queue(&self) -> &str {
        &self.garbage_queue
    }

    /// Publishes the rejection reason to the garbage queue, then acknowledges
    /// the original message.
    ///
    /// Never fails: a bad message must not be able to crash the worker. Errors
    /// are logged and the ack is attempted even if the publish failed.
    pub async fn send(
        &self,
        queue: &dyn Queue,
        message: &Message,
        ack: AckHandle,
        reason: &str,
        trail: Option<&Trail>,
    ) {
        log::warn!(
            "Sending message {:?} to '{}': {}",
            ack,
            self.garbage_queue,
            reason
        );
        log::debug!("Rejected message body: {}", message);

        let record = garbage_record(reason);
        if let Err(e) = queue
            .put(&record, &self.garbage_queue, DEFAULT_EXCHANGE, trail)
            .await
        {
            log::error!(
                "Failed to publish garbage record to '{}': {}",
                self.garbage_queue,
                e
            );
        }

        if let Err(e) = queue.ack(ack).await {
            log::error!("Failed to acknowledge garbage message {:?}: {}", ack, e);
        }
    }
}
