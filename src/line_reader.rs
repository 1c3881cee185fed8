//! Reads CRLF-terminated lines from a byte stream, enforcing a byte
//! ceiling across the connection.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::error::SessionError;

/// Reads lines off an `AsyncRead`, stripping the terminating CRLF (a lone
/// LF is tolerated) and returning the raw bytes otherwise untouched.
///
/// When `max_message_size` is set, the cumulative byte count read across
/// the whole connection is tracked; exceeding it surfaces as
/// [`SessionError::SizeExceeded`] so the session can reply 552 and close.
pub struct LineReader<R> {
    inner: BufReader<R>,
    max_message_size: Option<u64>,
    bytes_read: u64,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R, max_message_size: Option<u64>) -> Self {
        LineReader { inner: BufReader::new(inner), max_message_size, bytes_read: 0 }
    }

    /// Reads one line. `Ok(None)` means a clean end of stream with nothing
    /// left to deliver; a partial line sitting at EOF is still returned
    /// once before the following call yields `None`.
    pub async fn read_line(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        let mut buf = Vec::new();
        let n = self.inner.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Ok(None);
        }

        self.bytes_read += n as u64;
        if let Some(max) = self.max_message_size {
            if self.bytes_read > max {
                return Err(SessionError::SizeExceeded);
            }
        }

        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        Ok(Some(buf))
    }

    /// Releases the underlying stream, e.g. to hand it to a TLS acceptor
    /// after STARTTLS. Any bytes already buffered but unconsumed are lost,
    /// which is fine here: STARTTLS forbids pipelining past the command.
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_crlf_terminated_lines() {
        let data = b"EHLO a\r\nMAIL FROM:<x>\r\n".to_vec();
        let mut reader = LineReader::new(std::io::Cursor::new(data), None);
        assert_eq!(reader.read_line().await.unwrap(), Some(b"EHLO a".to_vec()));
        assert_eq!(reader.read_line().await.unwrap(), Some(b"MAIL FROM:<x>".to_vec()));
        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn tolerates_lone_lf() {
        let data = b"NOOP\n".to_vec();
        let mut reader = LineReader::new(std::io::Cursor::new(data), None);
        assert_eq!(reader.read_line().await.unwrap(), Some(b"NOOP".to_vec()));
    }

    #[tokio::test]
    async fn partial_line_at_eof_is_returned_once() {
        let data = b"QUI".to_vec();
        let mut reader = LineReader::new(std::io::Cursor::new(data), None);
        assert_eq!(reader.read_line().await.unwrap(), Some(b"QUI".to_vec()));
        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn exceeding_ceiling_errors() {
        let data = b"0123456789\r\nmore\r\n".to_vec();
        let mut reader = LineReader::new(std::io::Cursor::new(data), Some(5));
        match reader.read_line().await {
            Err(SessionError::SizeExceeded) => {}
            other => panic!("expected SizeExceeded, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn under_ceiling_succeeds() {
        let data = b"hi\r\n".to_vec();
        let mut reader = LineReader::new(std::io::Cursor::new(data), Some(100));
        assert_eq!(reader.read_line().await.unwrap(), Some(b"hi".to_vec()));
    }
}
