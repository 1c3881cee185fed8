//! The per-connection protocol engine: composes the line reader,
//! command parser, reply writer, transcript recorder, firewall hooks and
//! auth engine into one state machine. The heart of the crate.

use std::net::SocketAddr;
use std::time::SystemTime;

use log::{debug, info, trace, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::io::{split, AsyncRead};

use crate::auth::{cram_digest, decode_cram_response, decode_plain, constant_time_eq, generate_cram_challenge};
use crate::command::{Command, CommandType};
use crate::config::ServerConfig;
use crate::error::SessionError;
use crate::line_reader::LineReader;
use crate::listener::ServerListener;
use crate::message::DeliveredMessage;
use crate::reply::Reply;
use crate::sink::DeliveryError;
use crate::transcript::{latin1_project, Transcript};

/// One step in the per-connection conversation. `Closed` is reached only
/// via the connection simply ending, never dispatched on explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Greeted,
    Authenticating,
    Authenticated,
    HaveSender,
    HaveRecipients,
    InData,
    Forbidden,
    Closed,
}

/// The mutable per-connection fields tracked across a conversation,
/// minus the transcript (owned directly by [`Session`] instead, since
/// Rust has no need to box it behind a buffer field).
#[derive(Debug, Default)]
pub struct SessionData {
    pub peer_addr: Option<SocketAddr>,
    pub is_secure: bool,
    pub authenticated: bool,
    pub auth_attempts: u32,
    pub pending_cram: Option<String>,
    pub mail_from: Option<String>,
    pub recipients: Option<Vec<String>>,
    pub data_buffer: Option<Vec<u8>>,
    pub forbidden: bool,
    pub ehlo_domain: Option<String>,
}

impl SessionData {
    fn new(peer_addr: SocketAddr, is_secure: bool) -> Self {
        SessionData { peer_addr: Some(peer_addr), is_secure, ..Default::default() }
    }
}

/// What running a session to completion produced: either the connection
/// simply ended, or the client asked to upgrade to TLS and handed back
/// the raw stream for the listener to wrap.
pub enum SessionOutcome<S> {
    Closed,
    UpgradeTls(S),
}

/// Internal signal from command dispatch back to the read loop.
enum Dispatch {
    Continue,
    Quit,
    UpgradeTls,
}

/// One active SMTP conversation. Generic over the full-duplex stream `S`
/// so the exact same state machine drives a plain `TcpStream` and, after
/// STARTTLS, a `tokio_rustls::server::TlsStream<TcpStream>` — the
/// upgrade needs the underlying transport type to vary; the dispatch
/// logic does not.
pub struct Session<S> {
    reader: LineReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    transcript: Transcript,
    state: SessionState,
    data: SessionData,
    config: std::sync::Arc<ServerConfig>,
    session_id: u64,
    listeners: std::sync::Arc<Vec<std::sync::Arc<dyn ServerListener>>>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Session<S> {
    pub fn new(
        stream: S,
        peer_addr: SocketAddr,
        config: std::sync::Arc<ServerConfig>,
        session_id: u64,
        is_secure: bool,
        listeners: std::sync::Arc<Vec<std::sync::Arc<dyn ServerListener>>>,
    ) -> Self {
        let (r, w) = split(stream);
        let reader = LineReader::new(r, config.max_message_size);
        Session {
            reader,
            writer: w,
            transcript: Transcript::new(),
            state: SessionState::Greeted,
            data: SessionData::new(peer_addr, is_secure),
            config,
            session_id,
            listeners,
        }
    }

    /// Emits the initial `220` banner, unless this session began on the
    /// upgraded leg of a STARTTLS handshake (the banner was already sent
    /// on the plaintext leg).
    async fn send_banner(&mut self) -> Result<(), SessionError> {
        if self.data.is_secure {
            return Ok(());
        }
        let reply = Reply::single(220, format!("{} smtp4j server ready", self.config.local_hostname));
        self.send_reply(reply).await
    }

    /// Drives the conversation to completion: reads commands, dispatches
    /// them, and returns once the client disconnects, issues QUIT, or
    /// asks for a TLS upgrade.
    pub async fn run(mut self) -> Result<SessionOutcome<S>, SessionError> {
        self.send_banner().await?;

        loop {
            let read = match self.config.socket_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, self.reader.read_line()).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("session {} timed out waiting for the peer", self.session_id);
                        break;
                    }
                },
                None => self.reader.read_line().await,
            };

            let raw = match read {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    debug!("session {} peer disconnected", self.session_id);
                    break;
                }
                Err(SessionError::SizeExceeded) => {
                    warn!("session {} exceeded the message size ceiling", self.session_id);
                    let _ = self.send_reply(Reply::single(552, "Message size exceeds fixed maximum message size")).await;
                    return Ok(SessionOutcome::Closed);
                }
                Err(e) => return Err(e),
            };

            self.transcript.record_line(&raw);

            if self.state == SessionState::InData {
                self.handle_data_line(&raw).await?;
                continue;
            }

            if self.data.pending_cram.is_some() {
                self.handle_cram_response(&raw).await?;
                continue;
            }

            let line = latin1_project(&raw);
            trace!("session {} <- {:?}", self.session_id, line);
            let Some(cmd) = Command::parse(&line) else {
                debug!("session {} sent an empty line, closing", self.session_id);
                break;
            };

            match self.dispatch(cmd).await? {
                Dispatch::Continue => {}
                Dispatch::Quit => return Ok(SessionOutcome::Closed),
                Dispatch::UpgradeTls => {
                    let write_half = self.writer;
                    let stream = self.reader.into_inner().unsplit(write_half);
                    return Ok(SessionOutcome::UpgradeTls(stream));
                }
            }
        }

        Ok(SessionOutcome::Closed)
    }

    async fn send_reply(&mut self, reply: Reply) -> Result<(), SessionError> {
        let text = reply.render();
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.flush().await?;
        trace!("session {} -> {:?}", self.session_id, text);
        self.transcript.record_reply(text);
        Ok(())
    }

    async fn dispatch(&mut self, cmd: Command) -> Result<Dispatch, SessionError> {
        if self.data.forbidden {
            if cmd.kind == CommandType::Quit {
                self.send_reply(Reply::single(221, "Bye")).await?;
                return Ok(Dispatch::Quit);
            }
            self.send_reply(Reply::single(550, "Command refused")).await?;
            return Ok(Dispatch::Continue);
        }

        if self.config.require_tls
            && !self.data.is_secure
            && !matches!(cmd.kind, CommandType::Ehlo | CommandType::Helo | CommandType::StartTls | CommandType::Quit)
        {
            self.send_reply(Reply::single(530, "Must issue a STARTTLS command first")).await?;
            return Ok(Dispatch::Continue);
        }

        match cmd.kind {
            CommandType::Noop => {
                self.send_reply(Reply::single(250, "OK")).await?;
                return Ok(Dispatch::Continue);
            }
            CommandType::Reset => {
                self.reset_transaction();
                self.state = SessionState::Authenticated;
                self.send_reply(Reply::single(250, "OK")).await?;
                return Ok(Dispatch::Continue);
            }
            CommandType::Verify | CommandType::Expand | CommandType::Help => {
                self.send_reply(Reply::single(502, "Not supported")).await?;
                return Ok(Dispatch::Continue);
            }
            CommandType::Quit => {
                self.send_reply(Reply::single(221, "Bye")).await?;
                return Ok(Dispatch::Quit);
            }
            CommandType::Unknown => {
                self.send_reply(Reply::single(500, "Command not recognized")).await?;
                return Ok(Dispatch::Continue);
            }
            CommandType::Auth if self.config.auth.is_none() => {
                self.send_reply(Reply::single(500, "Command not recognized")).await?;
                return Ok(Dispatch::Continue);
            }
            CommandType::StartTls
                if self.state != SessionState::Greeted && !self.data.is_secure && self.config.tls.is_some() =>
            {
                return self.handle_starttls().await;
            }
            _ => {}
        }

        match self.state {
            SessionState::Greeted => self.handle_greeted(cmd).await,
            SessionState::Authenticating => self.handle_authenticating(cmd).await,
            SessionState::Authenticated => self.handle_authenticated(cmd).await,
            SessionState::HaveSender => self.handle_have_sender(cmd).await,
            SessionState::HaveRecipients => self.handle_have_recipients(cmd).await,
            SessionState::InData | SessionState::Forbidden | SessionState::Closed => {
                self.send_reply(Reply::single(503, "Bad sequence of commands")).await?;
                Ok(Dispatch::Continue)
            }
        }
    }

    fn reset_transaction(&mut self) {
        self.data.mail_from = None;
        self.data.recipients = None;
        self.data.data_buffer = None;
    }

    async fn handle_greeted(&mut self, cmd: Command) -> Result<Dispatch, SessionError> {
        match cmd.kind {
            CommandType::Ehlo => {
                let domain = cmd.parameter.unwrap_or_else(|| "you".to_string());
                self.data.ehlo_domain = Some(domain.clone());

                let mut lines = vec![format!("{} greets {}", self.config.local_hostname, domain)];
                lines.push("8BITMIME".to_string());
                if self.config.auth.is_some() {
                    lines.push("AUTH PLAIN CRAM-MD5".to_string());
                }
                if self.config.tls.is_some() && !self.data.is_secure {
                    lines.push("STARTTLS".to_string());
                    lines.push("REQUIRETLS".to_string());
                }
                lines.push(match self.config.max_message_size {
                    Some(size) => format!("SIZE {}", size),
                    None => "SIZE".to_string(),
                });

                self.send_reply(Reply::multiline(250, lines)).await?;
                self.state = self.post_greeting_state();
                Ok(Dispatch::Continue)
            }
            CommandType::Helo => {
                let domain = cmd.parameter.unwrap_or_else(|| "you".to_string());
                self.data.ehlo_domain = Some(domain.clone());
                self.send_reply(Reply::single(250, format!("{} greets {}", self.config.local_hostname, domain))).await?;
                self.state = self.post_greeting_state();
                Ok(Dispatch::Continue)
            }
            _ => {
                self.send_reply(Reply::single(503, "Bad sequence of commands")).await?;
                Ok(Dispatch::Continue)
            }
        }
    }

    fn post_greeting_state(&self) -> SessionState {
        if self.config.auth.is_some() {
            SessionState::Authenticating
        } else {
            SessionState::Authenticated
        }
    }

    async fn handle_authenticating(&mut self, cmd: Command) -> Result<Dispatch, SessionError> {
        match cmd.kind {
            CommandType::Auth => self.handle_auth_command(cmd).await,
            _ => {
                self.send_reply(Reply::single(503, "Bad sequence of commands")).await?;
                Ok(Dispatch::Continue)
            }
        }
    }

    async fn handle_auth_command(&mut self, cmd: Command) -> Result<Dispatch, SessionError> {
        let provider = match &self.config.auth {
            Some(p) => p.clone(),
            None => {
                self.send_reply(Reply::single(500, "Command not recognized")).await?;
                return Ok(Dispatch::Continue);
            }
        };

        self.data.auth_attempts += 1;
        if self.data.auth_attempts > provider.max_tries() {
            self.data.forbidden = true;
            self.state = SessionState::Forbidden;
            self.send_reply(Reply::single(550, "Too many authentication attempts")).await?;
            return Ok(Dispatch::Continue);
        }

        let param = cmd.parameter.unwrap_or_default();
        let mut parts = param.splitn(2, ' ');
        let mechanism = parts.next().unwrap_or("").to_ascii_uppercase();
        let initial_response = parts.next();

        match mechanism.as_str() {
            "PLAIN" => {
                let Some(b64) = initial_response else {
                    self.send_reply(Reply::single(501, "Syntax error in parameters")).await?;
                    return Ok(Dispatch::Continue);
                };
                let Some((_authzid, authcid, password)) = decode_plain(b64) else {
                    self.send_reply(Reply::single(501, "Syntax error in parameters")).await?;
                    return Ok(Dispatch::Continue);
                };
                let expected = provider.password_for(&authcid).await;
                let ok = expected.map(|pw| constant_time_eq(&pw, &password)).unwrap_or(false);
                if ok {
                    self.data.authenticated = true;
                    self.state = SessionState::Authenticated;
                    self.send_reply(Reply::single(235, "Authentication successful")).await?;
                } else {
                    self.send_reply(Reply::single(535, "Authentication credentials invalid")).await?;
                }
                Ok(Dispatch::Continue)
            }
            "CRAM-MD5" => {
                let (challenge, challenge_b64) = generate_cram_challenge(&self.config.local_hostname);
                self.data.pending_cram = Some(challenge);
                self.send_reply(Reply::single(334, challenge_b64)).await?;
                Ok(Dispatch::Continue)
            }
            _ => {
                self.send_reply(Reply::single(504, "Unrecognized authentication mechanism")).await?;
                Ok(Dispatch::Continue)
            }
        }
    }

    async fn handle_cram_response(&mut self, raw: &[u8]) -> Result<(), SessionError> {
        let challenge = self.data.pending_cram.take().expect("checked Some before calling");
        let text = latin1_project(raw);

        let provider = self.config.auth.clone();
        let outcome = decode_cram_response(&text);

        let reply = match outcome {
            Some((user, digest)) => {
                let expected_password = match &provider {
                    Some(p) => p.password_for(&user).await,
                    None => None,
                };
                let ok = expected_password
                    .map(|pw| constant_time_eq(&cram_digest(&pw, &challenge), &digest))
                    .unwrap_or(false);
                if ok {
                    self.data.authenticated = true;
                    self.state = SessionState::Authenticated;
                    Reply::single(235, "Authentication successful")
                } else {
                    Reply::single(535, "Authentication credentials invalid")
                }
            }
            None => Reply::single(501, "Malformed authentication response"),
        };

        self.send_reply(reply).await
    }

    async fn handle_authenticated(&mut self, cmd: Command) -> Result<Dispatch, SessionError> {
        match cmd.kind {
            CommandType::MailFrom => {
                let Some(addr) = cmd.parameter else {
                    self.send_reply(Reply::single(501, "Syntax error in MAIL FROM parameters")).await?;
                    return Ok(Dispatch::Continue);
                };
                if !self.config.firewall.allowed_from(&addr).await {
                    self.data.forbidden = true;
                    self.state = SessionState::Forbidden;
                    self.send_reply(Reply::single(550, "Sender refused")).await?;
                    return Ok(Dispatch::Continue);
                }
                self.data.mail_from = Some(addr);
                self.state = SessionState::HaveSender;
                self.send_reply(Reply::single(250, "OK")).await?;
                Ok(Dispatch::Continue)
            }
            _ => {
                self.send_reply(Reply::single(503, "Bad sequence of commands")).await?;
                Ok(Dispatch::Continue)
            }
        }
    }

    async fn handle_have_sender(&mut self, cmd: Command) -> Result<Dispatch, SessionError> {
        match cmd.kind {
            CommandType::RcptTo => self.handle_rcpt(cmd).await,
            _ => {
                self.send_reply(Reply::single(503, "Bad sequence of commands")).await?;
                Ok(Dispatch::Continue)
            }
        }
    }

    async fn handle_have_recipients(&mut self, cmd: Command) -> Result<Dispatch, SessionError> {
        match cmd.kind {
            CommandType::RcptTo => self.handle_rcpt(cmd).await,
            CommandType::Data => {
                self.state = SessionState::InData;
                self.data.data_buffer = Some(Vec::new());
                self.send_reply(Reply::single(354, "Start mail input; end with <CRLF>.<CRLF>")).await?;
                Ok(Dispatch::Continue)
            }
            _ => {
                self.send_reply(Reply::single(503, "Bad sequence of commands")).await?;
                Ok(Dispatch::Continue)
            }
        }
    }

    async fn handle_rcpt(&mut self, cmd: Command) -> Result<Dispatch, SessionError> {
        let Some(addr) = cmd.parameter else {
            self.send_reply(Reply::single(501, "Syntax error in RCPT TO parameters")).await?;
            return Ok(Dispatch::Continue);
        };
        if !self.config.firewall.allowed_recipient(&addr).await {
            self.send_reply(Reply::single(550, "Recipient refused")).await?;
            return Ok(Dispatch::Continue);
        }
        self.data.recipients.get_or_insert_with(Vec::new).push(addr);
        self.state = SessionState::HaveRecipients;
        self.send_reply(Reply::single(250, "OK")).await?;
        Ok(Dispatch::Continue)
    }

    async fn handle_starttls(&mut self) -> Result<Dispatch, SessionError> {
        self.send_reply(Reply::single(220, "Ready to start TLS")).await?;
        Ok(Dispatch::UpgradeTls)
    }

    /// DATA-phase line handling: dot-unstuffing, CRLF re-framing, and
    /// terminator detection. Operates on the raw bytes directly rather
    /// than routing through `Command::parse`, since DATA content has no
    /// relation to the command grammar.
    async fn handle_data_line(&mut self, raw: &[u8]) -> Result<(), SessionError> {
        if raw == b"." {
            return self.finish_data().await;
        }

        let buffer = self.data.data_buffer.get_or_insert_with(Vec::new);
        if raw.first() == Some(&b'.') {
            buffer.extend_from_slice(&raw[1..]);
        } else {
            buffer.extend_from_slice(raw);
        }
        buffer.extend_from_slice(b"\r\n");
        Ok(())
    }

    async fn finish_data(&mut self) -> Result<(), SessionError> {
        let mut raw = self.data.data_buffer.take().unwrap_or_default();
        if raw.ends_with(b"\r\n") {
            raw.truncate(raw.len() - 2);
        }

        if !self.config.firewall.allowed_message(&raw).await {
            self.data.forbidden = true;
            self.state = SessionState::Forbidden;
            self.send_reply(Reply::single(550, "Message content refused")).await?;
            self.reset_transaction();
            return Ok(());
        }

        // The message handed to the sink carries the transcript as it will
        // read if delivery succeeds: the DATA lines plus a provisional
        // "250 accepted" exchange. If the sink rejects the message, that
        // provisional transcript is discarded along with the message
        // itself (the sink never retains a message it refuses), so the
        // mismatch with the 554 actually written to the wire is never
        // observable.
        let success_reply = Reply::single(250, "OK: message accepted for delivery");
        let mut prospective_transcript = self.transcript.exchanges().to_vec();
        prospective_transcript.push(crate::transcript::Exchange {
            received_lines: self.transcript.pending_lines_snapshot(),
            reply_text: success_reply.render(),
        });

        let message = DeliveredMessage {
            secure: self.data.is_secure,
            envelope_sender: self.data.mail_from.clone().unwrap_or_default(),
            envelope_recipients: self.data.recipients.clone().unwrap_or_default(),
            raw_mime: raw,
            transcript: prospective_transcript,
            received_at: SystemTime::now(),
        };
        let delivered = message.clone();

        match self.config.sink.deliver(message).await {
            Ok(()) => {
                info!("session {} delivered a message", self.session_id);
                self.send_reply(success_reply).await?;
                for l in self.listeners.iter() {
                    l.notify_message(&delivered);
                }
            }
            Err(DeliveryError(reason)) => {
                warn!("session {} delivery rejected: {}", self.session_id, reason);
                self.send_reply(Reply::single(554, reason)).await?;
            }
        }

        self.reset_transaction();
        self.state = SessionState::Authenticated;
        Ok(())
    }
}
