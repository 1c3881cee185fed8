//! An embeddable SMTP server for tests: accepts mail over the wire,
//! decodes it into structured messages, and hands them to the embedding
//! program for inspection. This crate is a library first, with a small
//! demo binary in `src/main.rs`.

pub mod auth;
pub mod command;
pub mod config;
pub mod error;
pub mod firewall;
pub mod line_reader;
pub mod listener;
pub mod mailbox;
pub mod message;
pub mod reply;
pub mod session;
pub mod sink;
pub mod tls;
pub mod transcript;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use listener::{Server, ServerListener};
pub use mailbox::Mailbox;
pub use message::DeliveredMessage;
pub use sink::{DeliveryError, DeliverySink};
