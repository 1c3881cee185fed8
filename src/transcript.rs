//! Groups received lines with the reply they triggered into exchange
//! records, and projects raw bytes to text via ISO-8859-1 so the
//! transcript round-trips losslessly regardless of the wire encoding.

/// One exchange: the raw lines read since the previous reply, paired with
/// the full reply text the session emitted in response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub received_lines: Vec<String>,
    pub reply_text: String,
}

/// Accumulates exchanges for one connection.
#[derive(Debug, Default)]
pub struct Transcript {
    exchanges: Vec<Exchange>,
    pending_lines: Vec<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one line read from the peer, ahead of whatever reply it
    /// eventually triggers.
    pub fn record_line(&mut self, raw: &[u8]) {
        self.pending_lines.push(latin1_project(raw));
    }

    /// Closes out the current exchange with the reply text that was just
    /// sent, and clears the pending-lines buffer for the next one.
    pub fn record_reply(&mut self, reply_text: String) {
        let received_lines = std::mem::take(&mut self.pending_lines);
        self.exchanges.push(Exchange { received_lines, reply_text });
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    /// A copy of the lines recorded since the last reply, without closing
    /// out the exchange. Lets a caller preview what the *next* exchange
    /// would contain before the reply that closes it has actually been
    /// sent.
    pub fn pending_lines_snapshot(&self) -> Vec<String> {
        self.pending_lines.clone()
    }

    /// Consumes the transcript, handing ownership of its exchanges to the
    /// caller (used when building a [`DeliveredMessage`](crate::message::DeliveredMessage)).
    pub fn into_exchanges(self) -> Vec<Exchange> {
        self.exchanges
    }
}

/// Maps each byte to the Unicode code point of the same value (ISO-8859-1
/// is a 1:1 byte-to-char mapping), guaranteeing a lossless round trip no
/// matter what the peer actually sent.
pub fn latin1_project(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_one_exchange_per_reply() {
        let mut t = Transcript::new();
        t.record_line(b"EHLO client");
        t.record_reply("250 OK\r\n".to_string());
        t.record_line(b"MAIL FROM:<a@x>");
        t.record_reply("250 OK\r\n".to_string());

        assert_eq!(t.exchanges().len(), 2);
        assert_eq!(t.exchanges()[0].received_lines, vec!["EHLO client".to_string()]);
        assert_eq!(t.exchanges()[1].reply_text, "250 OK\r\n");
    }

    #[test]
    fn latin1_projection_is_one_to_one() {
        let raw: Vec<u8> = (0u8..=255).collect();
        let projected = latin1_project(&raw);
        let chars: Vec<char> = projected.chars().collect();
        assert_eq!(chars.len(), 256);
        for (i, c) in chars.iter().enumerate() {
            assert_eq!(*c as u32, i as u32);
        }
    }

    #[test]
    fn concatenating_exchanges_reproduces_wire_text() {
        let mut t = Transcript::new();
        t.record_line(b"EHLO x");
        t.record_reply("250-greets x\r\n250 SIZE\r\n".to_string());

        let mut wire = String::new();
        for exch in t.exchanges() {
            for line in &exch.received_lines {
                wire.push_str(line);
                wire.push_str("\r\n");
            }
            wire.push_str(&exch.reply_text);
        }
        assert_eq!(wire, "EHLO x\r\n250-greets x\r\n250 SIZE\r\n");
    }
}
