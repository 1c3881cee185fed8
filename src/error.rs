//! Error taxonomy for the per-connection protocol engine.
//!
//! Every failure a session can hit is a variant here so that the dispatch
//! loop can always pick the right SMTP reply without downcasting. Task-level
//! code (the listener, the demo binary) deals in `anyhow::Result` instead;
//! `SessionError` only needs to travel as far as the session loop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed command or bad sequence of commands.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Bad credentials or too many AUTH attempts.
    #[error("authentication failed")]
    Auth,

    /// Firewall refused the connection, sender, recipient, or message.
    #[error("refused by firewall")]
    Admission,

    /// Cumulative DATA bytes exceeded the configured ceiling.
    #[error("message size ceiling exceeded")]
    SizeExceeded,

    /// The delivery sink rejected a completed message.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// STARTTLS handshake or TLS context setup failed.
    #[error("TLS upgrade failed: {0}")]
    TlsUpgrade(String),

    /// Peer disconnect or other I/O failure reading/writing the stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
