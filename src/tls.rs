//! STARTTLS negotiation: wraps the underlying socket with a server-mode
//! TLS stream once the client asks for it.

use std::sync::Arc;

use rcgen::{CertifiedKey, generate_simple_self_signed};
use thiserror::Error;
use tokio_rustls::TlsAcceptor;

#[derive(Debug, Error)]
pub enum TlsSetupError {
    #[error("failed to generate self-signed certificate: {0}")]
    SelfSigned(String),
    #[error("invalid PEM certificate or key: {0}")]
    Pem(String),
    #[error("invalid rustls server config: {0}")]
    Config(#[from] rustls::Error),
}

/// Supplies the `rustls::ServerConfig` used to perform the STARTTLS
/// handshake. An embedder brings their own cert/key via `from_pem`;
/// `self_signed` covers zero-config embedding and tests.
pub trait TlsProvider: Send + Sync {
    fn acceptor(&self) -> TlsAcceptor;
}

pub struct RustlsProvider {
    config: Arc<rustls::ServerConfig>,
}

impl RustlsProvider {
    /// Generates a throwaway self-signed certificate for `hostname`. Fine
    /// for tests and local embedding; not for anything a real client
    /// validates against a trust store.
    pub fn self_signed(hostname: &str) -> Result<Self, TlsSetupError> {
        install_default_crypto_provider();
        let CertifiedKey { cert, signing_key } = generate_simple_self_signed(vec![hostname.to_string()])
            .map_err(|e| TlsSetupError::SelfSigned(e.to_string()))?;

        let cert_der = cert.der().clone();
        let key_der = rustls::pki_types::PrivateKeyDer::Pkcs8(
            rustls::pki_types::PrivatePkcs8KeyDer::from(signing_key.serialize_der()),
        );

        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)?;

        Ok(RustlsProvider { config: Arc::new(config) })
    }

    /// Loads a cert chain and private key from PEM bytes.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, TlsSetupError> {
        install_default_crypto_provider();
        let certs: Vec<_> = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<Result<_, _>>()
            .map_err(|e| TlsSetupError::Pem(e.to_string()))?;

        let key = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(|e| TlsSetupError::Pem(e.to_string()))?
            .ok_or_else(|| TlsSetupError::Pem("no private key found in PEM".into()))?;

        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        Ok(RustlsProvider { config: Arc::new(config) })
    }
}

impl TlsProvider for RustlsProvider {
    fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.config.clone())
    }
}

/// rustls 0.23 requires a process-wide default `CryptoProvider` before
/// any `ServerConfig`/`ClientConfig` is built. Installing it here, rather
/// than leaving it to the embedder, means `RustlsProvider` works with no
/// extra setup; `install_default` is idempotent and returns `Err` if
/// something else already installed one, which we ignore.
fn install_default_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}
