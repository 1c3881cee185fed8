//! Standalone demo binary: starts a server on an ephemeral (or
//! env-configured) port and prints every message it receives. Manual
//! testing only — not part of the library's public API.

use std::sync::Arc;

use log::{error, info};
use mail_capture::{Mailbox, ServerConfigBuilder};

#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    if let Err(e) = run().await {
        error!("mail_capture exited with an error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let port: i32 = std::env::var("MAIL_CAPTURE_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(0);
    let hostname = std::env::var("MAIL_CAPTURE_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());

    let mailbox = Arc::new(Mailbox::new());
    let config = ServerConfigBuilder::new().port(port).local_hostname(hostname).sink(mailbox.clone()).build();

    let server = mail_capture::Server::start(config, vec![]).await?;
    info!("mail_capture listening on {}", server.local_addr());

    loop {
        match mailbox.next_message().await {
            Some(message) => {
                info!(
                    "received message from {} to {:?} ({} bytes)",
                    message.envelope_sender,
                    message.envelope_recipients,
                    message.raw_mime.len()
                );
            }
            None => break,
        }
    }

    Ok(())
}
