//! Programmatic server configuration, built in code rather than
//! parsed from the environment. Loading it from env vars or a CLI is an
//! embedder's job, not this crate's.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthProvider;
use crate::firewall::{AllowAll, Firewall};
use crate::mailbox::Mailbox;
use crate::sink::DeliverySink;
use crate::tls::TlsProvider;

/// Everything a server needs to start, plus the `require_tls` flag that
/// distinguishes "STARTTLS offered" from "STARTTLS mandatory".
pub struct ServerConfig {
    pub port: i32,
    pub local_hostname: String,
    pub max_message_size: Option<u64>,
    pub socket_timeout: Option<Duration>,
    pub require_tls: bool,
    pub firewall: Arc<dyn Firewall>,
    pub auth: Option<Arc<dyn AuthProvider>>,
    pub tls: Option<Arc<dyn TlsProvider>>,
    pub sink: Arc<dyn DeliverySink>,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }
}

/// Builds a [`ServerConfig`]. Every field has a sensible default: an
/// ephemeral port, `localhost`, no size ceiling, an always-allow
/// firewall, no auth/TLS capability, and a plain in-memory [`Mailbox`]
/// as the delivery sink — a server built with `ServerConfigBuilder::new().build()`
/// is immediately usable.
pub struct ServerConfigBuilder {
    port: i32,
    local_hostname: String,
    max_message_size: Option<u64>,
    socket_timeout: Option<Duration>,
    require_tls: bool,
    firewall: Arc<dyn Firewall>,
    auth: Option<Arc<dyn AuthProvider>>,
    tls: Option<Arc<dyn TlsProvider>>,
    sink: Arc<dyn DeliverySink>,
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        ServerConfigBuilder {
            port: 0,
            local_hostname: "localhost".to_string(),
            max_message_size: None,
            socket_timeout: None,
            require_tls: false,
            firewall: Arc::new(AllowAll),
            auth: None,
            tls: None,
            sink: Arc::new(Mailbox::new()),
        }
    }

    pub fn port(mut self, port: i32) -> Self {
        self.port = port;
        self
    }

    pub fn local_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.local_hostname = hostname.into();
        self
    }

    pub fn max_message_size(mut self, bytes: u64) -> Self {
        self.max_message_size = Some(bytes);
        self
    }

    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    /// Whether, before STARTTLS completes, every command other than
    /// EHLO/HELO/STARTTLS/QUIT is refused with 530.
    pub fn require_tls(mut self, required: bool) -> Self {
        self.require_tls = required;
        self
    }

    pub fn firewall(mut self, firewall: Arc<dyn Firewall>) -> Self {
        self.firewall = firewall;
        self
    }

    pub fn auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn tls(mut self, tls: Arc<dyn TlsProvider>) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn DeliverySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> ServerConfig {
        ServerConfig {
            port: self.port,
            local_hostname: self.local_hostname,
            max_message_size: self.max_message_size,
            socket_timeout: self.socket_timeout,
            require_tls: self.require_tls,
            firewall: self.firewall,
            auth: self.auth,
            tls: self.tls,
            sink: self.sink,
        }
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_out_of_the_box() {
        let config = ServerConfigBuilder::new().build();
        assert_eq!(config.local_hostname, "localhost");
        assert_eq!(config.port, 0);
        assert!(config.auth.is_none());
        assert!(config.tls.is_none());
        assert!(!config.require_tls);
    }

    #[test]
    fn builder_overrides_take_effect() {
        let config = ServerConfigBuilder::new()
            .port(2525)
            .local_hostname("mail.example")
            .max_message_size(1024)
            .require_tls(true)
            .build();
        assert_eq!(config.port, 2525);
        assert_eq!(config.local_hostname, "mail.example");
        assert_eq!(config.max_message_size, Some(1024));
        assert!(config.require_tls);
    }
}
