//! The delivered-message snapshot handed to a delivery sink.

use std::time::SystemTime;

use crate::transcript::Exchange;

/// An immutable, fully-received message plus the transcript of the SMTP
/// exchange that produced it. Retains no reference to the connection's
/// socket; its lifetime is owned entirely by whoever the delivery sink
/// hands it to.
#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    /// Whether the connection was TLS-secured when this message was
    /// delivered.
    pub secure: bool,
    /// The `MAIL FROM` envelope address.
    pub envelope_sender: String,
    /// Every `RCPT TO` envelope address, BCC included — BCC is purely an
    /// envelope concept and never appears in `raw_mime`.
    pub envelope_recipients: Vec<String>,
    /// The raw RFC 5322 byte stream: dot-unstuffed, with the terminating
    /// CRLF before the lone `.` stripped.
    pub raw_mime: Vec<u8>,
    /// The full exchange-by-exchange record of this connection's SMTP
    /// conversation up to and including the DATA terminator.
    pub transcript: Vec<Exchange>,
    /// Stamped at the delivery-sink boundary, not by the session itself.
    pub received_at: SystemTime,
}
