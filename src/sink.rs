//! The contract by which a completed message is handed to the embedding
//! program.

use async_trait::async_trait;
use thiserror::Error;

use crate::message::DeliveredMessage;

/// Raised by a [`DeliverySink`] to reject a message after DATA completes.
/// The session converts this into a 554 reply carrying `.0` as the reason
/// text; the transaction is not latched forbidden, so a fresh MAIL FROM
/// may be attempted afterward.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct DeliveryError(pub String);

impl DeliveryError {
    pub fn new(msg: impl Into<String>) -> Self {
        DeliveryError(msg.into())
    }
}

/// Single capability: take ownership of a completed message, or refuse it.
/// "At-most-once per accepted DATA" — the sink owns its own storage
/// semantics beyond that.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, message: DeliveredMessage) -> Result<(), DeliveryError>;

    /// Called once by the server on shutdown so a blocking reader like
    /// [`Mailbox::next_message`](crate::mailbox::Mailbox::next_message)
    /// can wake up and yield end-of-stream. A no-op by default since most
    /// sinks have nothing to release.
    async fn close(&self) {}
}
