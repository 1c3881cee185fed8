//! Binds an endpoint, accepts sockets, and hands each to a session.
//! One task per connection, `tokio::spawn`ed off a shared `Arc` of
//! configuration.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::firewall::AsyncReadWrite;
use crate::message::DeliveredMessage;
use crate::session::{Session, SessionOutcome};

const WELL_KNOWN_SMTP_PORT: u16 = 25;
const DYNAMIC_PORT_FLOOR: u16 = 1024;
const DYNAMIC_PORT_CEILING: u16 = 65535;

/// Callbacks an embedder registers to observe server lifecycle events.
/// Run synchronously on the delivering task, so implementations must be
/// fast or hand work off themselves.
pub trait ServerListener: Send + Sync {
    fn notify_start(&self, _addr: SocketAddr) {}
    fn notify_close(&self) {}
    /// Fired once per message the delivery sink actually accepted, never
    /// on a plain connection close.
    fn notify_message(&self, _message: &DeliveredMessage) {}
}

/// The running server: owns the listening socket's lifecycle and the
/// cancellation tree that lets `close()` unblock every in-flight
/// session's reads at once.
pub struct Server {
    config: Arc<ServerConfig>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    accept_loop: tokio::task::JoinHandle<()>,
    listeners: Arc<Vec<Arc<dyn ServerListener>>>,
}

impl Server {
    /// Binds and starts accepting connections. A configured port `<= 0`
    /// first tries the well-known SMTP port, then scans upward from 1024
    /// for a free one.
    pub async fn start(
        config: ServerConfig,
        listeners: Vec<Arc<dyn ServerListener>>,
    ) -> Result<Self, anyhow::Error> {
        let config = Arc::new(config);
        let bind_addr = format!("0.0.0.0:{}", if config.port > 0 { config.port as u16 } else { 0 });
        let tcp_listener = if config.port > 0 {
            TcpListener::bind(&bind_addr).await?
        } else {
            Self::bind_dynamic().await?
        };

        let local_addr = tcp_listener.local_addr()?;
        info!("smtp server listening on {}", local_addr);

        let shutdown = CancellationToken::new();
        let listeners = Arc::new(listeners);

        for l in listeners.iter() {
            l.notify_start(local_addr);
        }

        let accept_config = config.clone();
        let accept_shutdown = shutdown.clone();
        let accept_listeners = listeners.clone();
        let accept_loop = tokio::spawn(async move {
            accept_connections(tcp_listener, accept_config, accept_shutdown, accept_listeners).await;
        });

        Ok(Server { config, local_addr, shutdown, accept_loop, listeners })
    }

    async fn bind_dynamic() -> Result<TcpListener, anyhow::Error> {
        if let Ok(listener) = TcpListener::bind(("0.0.0.0", WELL_KNOWN_SMTP_PORT)).await {
            return Ok(listener);
        }
        for port in DYNAMIC_PORT_FLOOR..=DYNAMIC_PORT_CEILING {
            if let Ok(listener) = TcpListener::bind(("0.0.0.0", port)).await {
                return Ok(listener);
            }
        }
        anyhow::bail!("no free port found for the SMTP listener")
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }

    /// Idempotent shutdown: cancelling the token unblocks every
    /// in-flight session's next read, which sees end-of-stream and exits.
    /// Aborts the accept loop and notifies registered listeners.
    pub async fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.accept_loop.abort();
        self.config.sink.close().await;
        for l in self.listeners.iter() {
            l.notify_close();
        }
    }
}

async fn accept_connections(
    tcp_listener: TcpListener,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
    listeners: Arc<Vec<Arc<dyn ServerListener>>>,
) {
    let next_session_id = AtomicU64::new(1);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("accept loop shutting down");
                return;
            }
            accepted = tcp_listener.accept() => {
                let (socket, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("failed to accept a connection: {}", e);
                        continue;
                    }
                };

                if !config.firewall.accept(peer_addr).await {
                    debug!("firewall refused connection from {}", peer_addr);
                    continue;
                }

                let session_id = next_session_id.fetch_add(1, Ordering::Relaxed);
                let conn_config = config.clone();
                let conn_shutdown = shutdown.child_token();
                let conn_listeners = listeners.clone();

                tokio::spawn(async move {
                    tokio::select! {
                        _ = conn_shutdown.cancelled() => {}
                        _ = serve_connection(socket, peer_addr, conn_config, session_id, false, conn_listeners) => {}
                    }
                });
            }
        }
    }
}

/// Drives one connection's session to completion. On a STARTTLS
/// outcome, wraps the handed-back stream in a TLS acceptor and
/// re-invokes itself on the upgraded stream with `is_secure = true` —
/// boxed because async fns can't recurse directly.
fn serve_connection(
    socket: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<ServerConfig>,
    session_id: u64,
    is_secure: bool,
    listeners: Arc<Vec<Arc<dyn ServerListener>>>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let _ = socket.set_nodelay(true);
        let boxed: Box<dyn AsyncReadWrite> = Box::new(socket);
        let stream = config.firewall.wrap_stream(boxed);
        serve_stream(stream, peer_addr, config, session_id, is_secure, listeners).await
    })
}

async fn serve_stream<S>(
    stream: S,
    peer_addr: SocketAddr,
    config: Arc<ServerConfig>,
    session_id: u64,
    is_secure: bool,
    listeners: Arc<Vec<Arc<dyn ServerListener>>>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let session = Session::new(stream, peer_addr, config.clone(), session_id, is_secure, listeners.clone());

    match session.run().await {
        Ok(SessionOutcome::Closed) => {
            debug!("session {} closed", session_id);
        }
        Ok(SessionOutcome::UpgradeTls(raw_stream)) => {
            let Some(tls) = &config.tls else {
                warn!("session {} asked for STARTTLS with no TLS provider configured", session_id);
                return;
            };
            match tls.acceptor().accept(raw_stream).await {
                Ok(tls_stream) => {
                    debug!("session {} upgraded to TLS", session_id);
                    serve_stream(tls_stream, peer_addr, config, session_id, true, listeners).await;
                }
                Err(e) => {
                    error!("session {} TLS handshake failed: {}", session_id, e);
                }
            }
        }
        Err(e) => {
            warn!("session {} ended with an error: {}", session_id, e);
        }
    }
}
