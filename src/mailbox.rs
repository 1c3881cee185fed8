//! The trivial in-memory mailbox: a FIFO queue of delivered messages with
//! a blocking reader, handed out to test code. Shipped as a concrete
//! `DeliverySink` so the crate delivers mail somewhere useful without the
//! embedder having to write their own sink first.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::message::DeliveredMessage;
use crate::sink::{DeliveryError, DeliverySink};

/// A FIFO queue of delivered messages. Cloning is cheap (it's a handle);
/// every clone reads from the same underlying queue.
pub struct Mailbox {
    sender: mpsc::UnboundedSender<DeliveredMessage>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<DeliveredMessage>>,
    closed: CancellationToken,
}

impl Mailbox {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Mailbox { sender, receiver: AsyncMutex::new(receiver), closed: CancellationToken::new() }
    }

    /// Drains whatever is currently queued. If the queue is empty and
    /// `delay` is given, waits up to that long for at least one message
    /// before giving up.
    pub async fn read_messages(&self, delay: Option<Duration>) -> Vec<DeliveredMessage> {
        let mut receiver = self.receiver.lock().await;
        let mut out = Vec::new();

        if let Some(delay) = delay {
            tokio::select! {
                res = tokio::time::timeout(delay, receiver.recv()) => {
                    match res {
                        Ok(Some(msg)) => out.push(msg),
                        _ => return out,
                    }
                }
                _ = self.closed.cancelled() => return out,
            }
        }

        while let Ok(msg) = receiver.try_recv() {
            out.push(msg);
        }
        out
    }

    /// A blocking-iterator equivalent: awaits the next delivered message,
    /// returning `None` once the server has shut down (see
    /// [`crate::listener::Server::close`], which calls
    /// [`DeliverySink::close`] on its way out).
    pub async fn next_message(&self) -> Option<DeliveredMessage> {
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            msg = receiver.recv() => msg,
            _ = self.closed.cancelled() => None,
        }
    }

    /// A second handle onto the same queue, for sharing between the
    /// server (which writes) and test code (which reads) without cloning
    /// the mailbox itself.
    pub fn sender(&self) -> mpsc::UnboundedSender<DeliveredMessage> {
        self.sender.clone()
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliverySink for Mailbox {
    async fn deliver(&self, message: DeliveredMessage) -> Result<(), DeliveryError> {
        self.sender
            .send(message)
            .map_err(|_| DeliveryError::new("mailbox closed"))
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}
