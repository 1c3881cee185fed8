//! Admission decisions at peer-connect, MAIL FROM, RCPT TO, and
//! message-complete, plus an optional byte-level wrapper around the
//! connection itself.
//!
//! The first four hooks default to "allow"; embedders override only the
//! ones they care about. A negative decision from `allowed_from` or
//! `allowed_message` latches the session's forbidden state; a negative
//! decision from `allowed_recipient` does not (the client may retry with a
//! different recipient, or the sender policy may reject the whole
//! transaction later).

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Object-safe shorthand for a full-duplex async byte stream. Lets
/// `Firewall::wrap_stream` swap in a different stream type (a rate
/// limiter, a byte logger, a traffic shaper) without `Firewall` itself
/// needing to be generic over the connection's IO type.
pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadWrite for T {}

#[async_trait]
pub trait Firewall: Send + Sync {
    /// Called once per accepted TCP connection, before the greeting is
    /// sent. Returning `false` refuses the connection outright.
    async fn accept(&self, _peer: SocketAddr) -> bool {
        true
    }

    /// Called after a syntactically valid `MAIL FROM:<addr>`.
    async fn allowed_from(&self, _addr: &str) -> bool {
        true
    }

    /// Called after each syntactically valid `RCPT TO:<addr>`.
    async fn allowed_recipient(&self, _addr: &str) -> bool {
        true
    }

    /// Called once the DATA terminator has been read, with the raw
    /// (dot-unstuffed, CRLF-terminated-but-not-trailing) message bytes.
    async fn allowed_message(&self, _raw: &[u8]) -> bool {
        true
    }

    /// Called once per accepted connection, after `accept` and before the
    /// greeting is written, with the raw socket boxed as a trait object.
    /// The default is the identity: the stream passes through unchanged.
    /// Override to inspect or reshape bytes below the SMTP protocol layer
    /// (throttling, traffic logging, byte-level tripwires).
    fn wrap_stream(&self, stream: Box<dyn AsyncReadWrite>) -> Box<dyn AsyncReadWrite> {
        stream
    }
}

/// The default firewall: admits everything. Useful as a baseline and in
/// tests that don't care about admission control.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl Firewall for AllowAll {}
