//! Reactions to session lifecycle events.
//!
//! [`MailboxWatcher`] decides what to fetch: the messages matching the startup
//! search once the session is ready, and the newest messages whenever the server
//! announces new mail.

use crate::error::Result;
use crate::fetcher::{FetchReport, MessageFetcher};
use crate::message::MessageSet;
use crate::query::SearchQuery;
use crate::session::MailboxSession;
use crate::sink::{AttachmentSink, NoopSink};
use tracing::{debug, error, info, instrument};

/// Decides which messages to fetch for each lifecycle event.
#[derive(Debug, Clone)]
pub struct MailboxWatcher<K = NoopSink> {
    mailbox: String,
    search: SearchQuery,
    fetcher: MessageFetcher<K>,
}

impl<K: AttachmentSink> MailboxWatcher<K> {
    /// Creates a watcher for `mailbox` running `search` at startup.
    pub fn new(mailbox: impl Into<String>, search: SearchQuery, fetcher: MessageFetcher<K>) -> Self {
        Self {
            mailbox: mailbox.into(),
            search,
            fetcher,
        }
    }

    /// Returns the watched mailbox name.
    #[must_use]
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// Returns the startup search.
    #[must_use]
    pub fn search(&self) -> &SearchQuery {
        &self.search
    }

    /// Opens the mailbox and processes the messages matching the startup search.
    ///
    /// Search and fetch failures are logged and leave the session usable. A failed
    /// startup search therefore does not end the session the way a failed open does;
    /// the watcher goes on to wait for new mail.
    ///
    /// # Errors
    ///
    /// Returns an error if the mailbox cannot be opened.
    #[instrument(name = "MailboxWatcher::on_ready", skip(self, session), fields(mailbox = %self.mailbox))]
    pub async fn on_ready<S: MailboxSession>(&self, session: &mut S) -> Result<FetchReport> {
        let status = session.open_inbox(&self.mailbox).await?;
        info!(exists = status.exists, "Mailbox open");

        let uids = match session.search(&self.search).await {
            Ok(uids) => uids,
            Err(e) => {
                error!(error = %e, query = %self.search, "Startup search failed");
                return Ok(FetchReport::default());
            }
        };

        if uids.is_empty() {
            info!(query = %self.search, "No matching messages");
            return Ok(FetchReport::default());
        }

        info!(count = uids.len(), "Fetching matching messages");

        let set = MessageSet::uids(uids);
        Ok(self.fetch_logged(session, &set).await)
    }

    /// Processes the `count` newest messages after a new-mail notification.
    ///
    /// The range is computed from the message count observed right after the
    /// notification. Fetch failures are logged.
    #[instrument(name = "MailboxWatcher::on_mail", skip(self, session))]
    pub async fn on_mail<S: MailboxSession>(&self, session: &mut S, count: u32) -> FetchReport {
        let total = session.message_count();
        let Some(set) = MessageSet::newest(total, count) else {
            debug!(total, "Notification without a fetchable range");
            return FetchReport::default();
        };

        info!(count, total, set = %set, "New mail");
        self.fetch_logged(session, &set).await
    }

    async fn fetch_logged<S: MailboxSession>(&self, session: &mut S, set: &MessageSet) -> FetchReport {
        match self.fetcher.fetch(session, set).await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, set = %set, "Fetch failed, batch aborted");
                FetchReport::default()
            }
        }
    }
}
