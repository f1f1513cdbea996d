//! Example: Watch a mailbox and store attachments.
//!
//! Connects with settings from the environment (or a `.env` file), processes the
//! messages matching the startup search, then keeps the session open with IDLE and
//! processes new mail as it arrives.
//!
//! # Usage
//!
//! ```bash
//! export IMAP_USER="ingest@example.com"
//! export IMAP_PASSWORD="your-app-password"
//! export IMAP_HOST="imap.example.com"
//! export TLS_ENABLED="true"
//! # Optional: unseen | recent (default)
//! export SEARCH_CRITERIA="unseen"
//! # Set log level (trace, debug, info, warn, error)
//! export RUST_LOG=mail_ingest=debug
//!
//! cargo run --example watch_inbox
//! ```

use mail_ingest::{
    AttachmentStore, ConnectionManager, LifecycleEvent, MailboxWatcher, MessageFetcher,
    WatcherConfig,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> mail_ingest::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mail_ingest=info")),
        )
        .with_target(true)
        .init();

    let config = WatcherConfig::from_env()?;

    tracing::info!(
        user = %config.user(),
        server = %config.server_address(),
        mailbox = %config.mailbox,
        search = %config.search,
        "Starting watcher"
    );

    let fetcher = MessageFetcher::new(AttachmentStore::new(&config.attachments_dir));
    let watcher = MailboxWatcher::new(&config.mailbox, config.search.clone(), fetcher);

    let mut lifecycle = ConnectionManager::spawn(config, watcher);

    loop {
        tokio::select! {
            event = lifecycle.next_event() => match event {
                Some(LifecycleEvent::Ready) => tracing::info!("Ready"),
                Some(LifecycleEvent::Mail { count }) => tracing::info!(count, "New mail"),
                Some(LifecycleEvent::Error(e)) => {
                    // Terminal for this session; a supervisor may restart the process.
                    tracing::error!(error = %e, category = %e.category(), "Session failed");
                    return Err(e);
                }
                Some(LifecycleEvent::End) | None => {
                    tracing::info!("Session ended");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                lifecycle.abort();
                break;
            }
        }
    }

    Ok(())
}
