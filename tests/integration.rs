//! Black-box integration tests: a real `TcpStream` talking to a server
//! bound on an ephemeral port, covering plain delivery, envelope-only
//! Bcc, the message size ceiling, and a required STARTTLS upgrade.

use std::sync::Arc;
use std::time::Duration;

use mail_capture::config::ServerConfigBuilder;
use mail_capture::{Mailbox, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn send_and_collect(stream: &mut TcpStream, lines: &[&str]) -> String {
    for line in lines {
        stream.write_all(line.as_bytes()).await.unwrap();
    }
    let mut buf = vec![0u8; 8192];
    let mut out = String::new();
    loop {
        match tokio::time::timeout(Duration::from_millis(200), stream.read(&mut buf)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => out.push_str(&String::from_utf8_lossy(&buf[..n])),
            Ok(Err(_)) => break,
        }
    }
    out
}

#[tokio::test]
async fn plain_delivery() {
    let mailbox = Arc::new(Mailbox::new());
    let config = ServerConfigBuilder::new().sink(mailbox.clone()).build();
    let server = Server::start(config, vec![]).await.unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
    let transcript = send_and_collect(
        &mut stream,
        &[
            "EHLO t\r\n",
            "MAIL FROM:<a@x>\r\n",
            "RCPT TO:<b@y>\r\n",
            "DATA\r\n",
            "Subject: hi\r\n",
            "\r\n",
            "body\r\n",
            ".\r\n",
            "QUIT\r\n",
        ],
    )
    .await;

    assert!(transcript.starts_with("220 "));
    assert!(transcript.contains("354 "));
    assert!(transcript.contains("250 OK: message accepted for delivery"));
    assert!(transcript.trim_end().ends_with("221 Bye"));

    let messages = mailbox.read_messages(Some(Duration::from_millis(200))).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].envelope_sender, "<a@x>");
    assert_eq!(messages[0].envelope_recipients, vec!["<b@y>".to_string()]);
    assert_eq!(messages[0].raw_mime, b"Subject: hi\r\n\r\nbody");

    server.close().await;
}

#[tokio::test]
async fn bcc_is_envelope_only() {
    let mailbox = Arc::new(Mailbox::new());
    let config = ServerConfigBuilder::new().sink(mailbox.clone()).build();
    let server = Server::start(config, vec![]).await.unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
    send_and_collect(
        &mut stream,
        &[
            "EHLO t\r\n",
            "MAIL FROM:<a@x>\r\n",
            "RCPT TO:<b@y>\r\n",
            "RCPT TO:<bcc@x>\r\n",
            "DATA\r\n",
            "Subject: hi\r\n",
            "\r\n",
            "body\r\n",
            ".\r\n",
            "QUIT\r\n",
        ],
    )
    .await;

    let messages = mailbox.read_messages(Some(Duration::from_millis(200))).await;
    let message = &messages[0];
    assert!(message.envelope_recipients.contains(&"<bcc@x>".to_string()));

    let parsed = mailparse::parse_mail(&message.raw_mime).unwrap();
    assert!(parsed.headers.get_first_value("Bcc").is_none());

    server.close().await;
}

#[tokio::test]
async fn size_ceiling_closes_the_connection() {
    let mailbox = Arc::new(Mailbox::new());
    let config = ServerConfigBuilder::new().sink(mailbox.clone()).max_message_size(64).build();
    let server = Server::start(config, vec![]).await.unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
    let oversized_line = "x".repeat(200);
    let transcript = send_and_collect(
        &mut stream,
        &["EHLO t\r\n", "MAIL FROM:<a@x>\r\n", "RCPT TO:<b@y>\r\n", "DATA\r\n", &format!("{}\r\n", oversized_line)],
    )
    .await;

    assert!(transcript.contains("552 "));
    assert!(mailbox.read_messages(Some(Duration::from_millis(100))).await.is_empty());

    server.close().await;
}

#[tokio::test]
async fn starttls_required_then_accepted() {
    let tls = mail_capture::tls::RustlsProvider::self_signed("localhost").unwrap();
    let config = ServerConfigBuilder::new().require_tls(true).tls(Arc::new(tls)).build();
    let server = Server::start(config, vec![]).await.unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
    let refused = send_and_collect(&mut stream, &["EHLO t\r\n", "MAIL FROM:<a@x>\r\n"]).await;
    assert!(refused.contains("530 "));

    stream.write_all(b"STARTTLS\r\n").await.unwrap();
    let mut buf = [0u8; 256];
    let n = stream.read(&mut buf).await.unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).starts_with("220"));

    let client_config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerify))
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));
    let server_name = rustls::pki_types::ServerName::try_from("localhost").unwrap();
    let mut tls_stream = connector.connect(server_name, stream).await.unwrap();

    let accepted = send_and_collect_tls(&mut tls_stream, &["EHLO t\r\n", "MAIL FROM:<a@x>\r\n"]).await;
    assert!(accepted.contains("250"));

    server.close().await;
}

async fn send_and_collect_tls(stream: &mut tokio_rustls::client::TlsStream<TcpStream>, lines: &[&str]) -> String {
    for line in lines {
        stream.write_all(line.as_bytes()).await.unwrap();
    }
    let mut buf = vec![0u8; 8192];
    let mut out = String::new();
    loop {
        match tokio::time::timeout(Duration::from_millis(200), stream.read(&mut buf)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => out.push_str(&String::from_utf8_lossy(&buf[..n])),
            Ok(Err(_)) => break,
        }
    }
    out
}

/// Accepts any certificate. Fine for a test client talking to our own
/// self-signed TLS provider; never appropriate outside a test.
#[derive(Debug)]
struct NoVerify;

impl rustls::client::danger::ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms.supported_schemes()
    }
}
