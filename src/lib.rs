//! # mail-ingest
//!
//! Async IMAP inbox watcher that extracts message attachments to disk.
//!
//! This crate provides:
//! - A long-lived session on one mailbox, kept open with IMAP IDLE
//! - A startup batch over the messages matching a search (recent or unseen)
//! - MIME decoding of every fetched message, including nested multiparts and
//!   encoded headers
//! - Attachment files written to one directory per message, named after its
//!   subject and date
//! - `\Seen` acknowledgment of every fetched message, whether or not it parsed
//!
//! ## Features
//!
//! - **`observability`**: Enables OpenTelemetry integration for distributed tracing.
//!   Without this feature, tracing spans are still emitted but require no OTEL dependencies.
//! - **`http-sink`**: Adds `HttpSink`, which forwards stored attachments to an HTTP
//!   endpoint.
//!
//! ## Quick Start
//!
//! ```no_run
//! use mail_ingest::{
//!     AttachmentStore, ConnectionManager, LifecycleEvent, MailboxWatcher, MessageFetcher,
//!     SearchQuery, WatcherConfig,
//! };
//!
//! # async fn example() -> mail_ingest::Result<()> {
//! let config = WatcherConfig::builder()
//!     .user("ingest@example.com")
//!     .password("app-password")
//!     .host("imap.example.com")
//!     .search(SearchQuery::Unseen)
//!     .build()?;
//!
//! let fetcher = MessageFetcher::new(AttachmentStore::new("attachments"));
//! let watcher = MailboxWatcher::new("INBOX", config.search.clone(), fetcher);
//!
//! let mut lifecycle = ConnectionManager::spawn(config, watcher);
//! while let Some(event) = lifecycle.next_event().await {
//!     match event {
//!         LifecycleEvent::Ready => println!("connected"),
//!         LifecycleEvent::Mail { count } => println!("{count} new message(s)"),
//!         LifecycleEvent::Error(e) => return Err(e),
//!         LifecycleEvent::End => break,
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Parsing Without a Server
//!
//! ```
//! let raw = b"Subject: Hello\r\nFrom: a@example.com\r\n\r\nbody\r\n";
//! let message = mail_ingest::parse(raw).unwrap();
//! assert_eq!(message.subject.as_deref(), Some("Hello"));
//! assert!(message.attachments.is_empty());
//! ```
//!
//! ## Error Handling
//!
//! Errors scoped to one message or one file (malformed MIME, a failed write, a
//! failed acknowledgment) are logged and never stop the session. Use
//! [`Error::escalates`] to tell them apart from errors that end a session or a
//! batch, and [`Error::is_retryable`] to drive an external reconnect policy:
//!
//! ```
//! use mail_ingest::Error;
//!
//! fn handle_error(error: &Error) {
//!     if error.is_retryable() {
//!         println!("Transient error, reconnect: {}", error);
//!     } else {
//!         println!("Permanent error: {}", error);
//!     }
//! }
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation. All major operations emit spans with
//! structured fields.
//!
//! ### Span Naming Convention
//!
//! - `ConnectionManager::run` - Whole session
//! - `ConnectionManager::connect` - Transport and login
//! - `ConnectionManager::drive` - Startup batch and notification loop
//! - `MailboxWatcher::on_ready` / `MailboxWatcher::on_mail` - Batch selection
//! - `MessageFetcher::fetch` - One batch
//! - `AttachmentStore::persist` - Attachment writes for one message
//! - `SeenFlagTracker::mark_seen` - Acknowledgment
//! - `session::*` / `connection::*` - IMAP commands and transport
//!
//! ### Standard Fields
//!
//! - `user` - Login name
//! - `imap_host` - IMAP server hostname
//! - `mailbox` - Watched mailbox
//! - `set` - Message set being fetched
//! - `uid` - Message UID
//!
//! Enable the `observability` feature for OpenTelemetry integration.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod ack;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod manager;
pub mod message;
pub mod parser;
pub mod query;
pub mod session;
pub mod sink;
pub mod store;
pub mod watcher;

// Internal modules
mod connection;

// Re-exports for ergonomic API
pub use ack::SeenFlagTracker;
pub use config::{TimeoutConfig, WatcherConfig, WatcherConfigBuilder};
pub use error::{Error, ErrorCategory, Result};
pub use fetcher::{FetchReport, MessageFetcher};
pub use manager::{ConnectionManager, Lifecycle, LifecycleEvent, SessionState};
pub use message::{Attachment, Disposition, MessageSet, ParsedMessage, RawMessage};
pub use parser::parse;
pub use query::SearchQuery;
pub use session::{ImapMailbox, MailboxEvent, MailboxSession, MailboxStatus};
pub use sink::{AttachmentDelivery, AttachmentSink, NoopSink};
#[cfg(feature = "http-sink")]
pub use sink::HttpSink;
pub use store::{AttachmentStore, PersistReport};
pub use watcher::MailboxWatcher;
