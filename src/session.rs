//! IMAP session operations.
//!
//! [`MailboxSession`] is the seam between the ingestion pipeline and the wire: the
//! watcher, fetcher and seen-flag tracker only ever talk to a mailbox through it.
//! [`ImapMailbox`] is the implementation backed by a live `async-imap` session.

use crate::config::{TimeoutConfig, WatcherConfig};
use crate::connection::MailStream;
use crate::error::{Error, Result};
use crate::message::{MessageSet, RawMessage};
use crate::query::SearchQuery;
use async_imap::extensions::idle::IdleResponse;
use async_imap::imap_proto::{MailboxDatum, Response, Status};
use async_imap::types::UnsolicitedResponse;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument};

/// Type alias for an IMAP session over the crate's transport.
pub(crate) type ImapSession = async_imap::Session<MailStream>;

/// Fetch items requested for every message: the UID plus the full RFC 822 message,
/// without implicitly setting `\Seen`.
const FETCH_ITEMS: &str = "(UID BODY.PEEK[])";

/// Mailbox state reported when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxStatus {
    /// Number of messages in the mailbox.
    pub exists: u32,
    /// `UIDVALIDITY` of the mailbox, if reported.
    pub uid_validity: Option<u32>,
    /// Predicted next UID, if reported.
    pub uid_next: Option<u32>,
}

/// Outcome of waiting for the server to report mailbox changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxEvent {
    /// `count` messages arrived since the last observation.
    NewMail {
        /// Number of new messages.
        count: u32,
    },
    /// Nothing arrived before the keepalive interval ran out.
    KeepaliveElapsed,
    /// The server closed the session in an orderly way.
    Closed,
}

/// Operations the ingestion pipeline needs from a mailbox session.
///
/// Implementations own the connection; callers never share one between tasks.
pub trait MailboxSession: Send {
    /// Opens `mailbox` read-write.
    fn open_inbox(&mut self, mailbox: &str) -> impl Future<Output = Result<MailboxStatus>> + Send;

    /// Current number of messages in the open mailbox, as last observed.
    fn message_count(&self) -> u32;

    /// Returns the UIDs matching `query`.
    fn search(&mut self, query: &SearchQuery) -> impl Future<Output = Result<Vec<u32>>> + Send;

    /// Fetches the full raw bytes of every message in `set`.
    ///
    /// Messages are yielded as the server produces them, which need not be the
    /// order of `set`.
    fn fetch<'a>(
        &'a mut self,
        set: &'a MessageSet,
    ) -> impl Future<Output = Result<BoxStream<'a, Result<RawMessage>>>> + Send + 'a;

    /// Adds the `\Seen` flag to the message with `uid`.
    fn add_seen_flag(&mut self, uid: u32) -> impl Future<Output = Result<()>> + Send;

    /// Waits until the server reports new messages, the keepalive interval elapses,
    /// or the session closes.
    fn wait_for_mail(&mut self) -> impl Future<Output = Result<MailboxEvent>> + Send;

    /// Ends the session.
    fn logout(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Authentication configuration for IMAP.
pub(crate) struct AuthConfig<'a> {
    pub user: &'a str,
    pub password: &'a str,
}

/// Authenticates to IMAP server and returns a session.
#[instrument(name = "session::authenticate", skip_all, fields(user = %config.user))]
pub(crate) async fn authenticate(
    stream: MailStream,
    config: &AuthConfig<'_>,
) -> Result<ImapSession> {
    let client = async_imap::Client::new(stream);

    debug!("Authenticating to IMAP server");

    client
        .login(config.user, config.password)
        .await
        .map_err(|e| Error::ImapLogin {
            user: config.user.to_string(),
            source: e.0,
        })
}

/// Mailbox size as reported by `EXISTS` and `EXPUNGE`, applied in arrival order.
///
/// `added` accumulates messages that arrived since it was last taken, so an expunge
/// followed by an arrival still counts the arrival.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct MessageCount {
    total: u32,
    added: u32,
}

/// What a response seen while idling meant for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observed {
    /// The mailbox size was updated.
    Counted,
    /// The server is closing the connection.
    Bye,
    /// Nothing relevant.
    Ignored,
}

impl MessageCount {
    /// Starts over from the total reported by `SELECT`.
    fn reset(&mut self, total: u32) {
        self.total = total;
        self.added = 0;
    }

    fn exists(&mut self, total: u32) {
        self.added = self.added.saturating_add(total.saturating_sub(self.total));
        self.total = total;
    }

    fn expunge(&mut self) {
        self.total = self.total.saturating_sub(1);
    }

    /// Returns the arrivals since the last call, never more than the total.
    fn take_added(&mut self) -> u32 {
        std::mem::take(&mut self.added).min(self.total)
    }

    fn observe(&mut self, response: &Response<'_>) -> Observed {
        match response {
            Response::MailboxData(MailboxDatum::Exists(total)) => {
                self.exists(*total);
                Observed::Counted
            }
            Response::Expunge(_) => {
                self.expunge();
                Observed::Counted
            }
            Response::Data {
                status: Status::Bye,
                ..
            } => Observed::Bye,
            _ => Observed::Ignored,
        }
    }

    fn observe_unsolicited(&mut self, response: &UnsolicitedResponse) -> Observed {
        match response {
            UnsolicitedResponse::Exists(total) => {
                self.exists(*total);
                Observed::Counted
            }
            UnsolicitedResponse::Expunge(_) => {
                self.expunge();
                Observed::Counted
            }
            _ => Observed::Ignored,
        }
    }

    fn event(&mut self) -> MailboxEvent {
        match self.take_added() {
            0 => MailboxEvent::KeepaliveElapsed,
            count => MailboxEvent::NewMail { count },
        }
    }
}

/// A live IMAP session on one mailbox.
pub struct ImapMailbox {
    session: Option<ImapSession>,
    mailbox: String,
    count: MessageCount,
    timeouts: TimeoutConfig,
    idle_keepalive: Duration,
}

impl ImapMailbox {
    pub(crate) fn new(session: ImapSession, config: &WatcherConfig) -> Self {
        Self {
            session: Some(session),
            mailbox: config.mailbox.clone(),
            count: MessageCount::default(),
            timeouts: config.timeouts.clone(),
            idle_keepalive: config.idle_keepalive,
        }
    }

    fn session(&mut self) -> Result<&mut ImapSession> {
        self.session.as_mut().ok_or(Error::SessionClosed)
    }

    /// Applies queued unsolicited responses in the order they arrived.
    fn drain_unsolicited(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        while let Ok(response) = session.unsolicited_responses.try_recv() {
            if self.count.observe_unsolicited(&response) == Observed::Ignored {
                debug!(response = ?response, "Ignoring unsolicited response");
            }
        }
    }
}

impl std::fmt::Debug for ImapMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapMailbox")
            .field("mailbox", &self.mailbox)
            .field("exists", &self.count.total)
            .field("open", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

impl MailboxSession for ImapMailbox {
    #[instrument(name = "session::open_inbox", skip(self))]
    async fn open_inbox(&mut self, mailbox: &str) -> Result<MailboxStatus> {
        let timeout = self.timeouts.select;
        let session = self.session()?;

        debug!("Selecting mailbox read-write");

        let selected = tokio::time::timeout(timeout, session.select(mailbox))
            .await
            .map_err(|_| Error::SelectTimeout {
                mailbox: mailbox.to_string(),
                timeout,
            })?
            .map_err(|source| Error::SelectMailbox {
                mailbox: mailbox.to_string(),
                source,
            })?;

        self.mailbox = mailbox.to_string();
        self.count.reset(selected.exists);

        debug!(exists = selected.exists, "Mailbox opened");

        Ok(MailboxStatus {
            exists: selected.exists,
            uid_validity: selected.uid_validity,
            uid_next: selected.uid_next,
        })
    }

    fn message_count(&self) -> u32 {
        self.count.total
    }

    #[instrument(name = "session::search", skip(self), fields(query = %query))]
    async fn search(&mut self, query: &SearchQuery) -> Result<Vec<u32>> {
        let timeout = self.timeouts.search;
        let imap_query = query.to_imap();
        let session = self.session()?;

        let uids = tokio::time::timeout(timeout, session.uid_search(&imap_query))
            .await
            .map_err(|_| Error::SearchTimeout {
                query: imap_query.clone(),
                timeout,
            })?
            .map_err(|source| Error::ImapSearch {
                query: imap_query.clone(),
                source,
            })?;

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();

        debug!(uid_count = uids.len(), "Search complete");

        Ok(uids)
    }

    async fn fetch<'a>(
        &'a mut self,
        set: &'a MessageSet,
    ) -> Result<BoxStream<'a, Result<RawMessage>>> {
        let timeout = self.timeouts.fetch;
        let set_str = set.to_imap();
        let session = self.session()?;

        debug!(set = %set_str, uid = set.is_uid(), "Fetching messages");

        let stream = if set.is_uid() {
            tokio::time::timeout(timeout, session.uid_fetch(set_str.clone(), FETCH_ITEMS))
                .await
                .map(|result| result.map(|stream| stream.boxed()))
        } else {
            tokio::time::timeout(timeout, session.fetch(set_str.clone(), FETCH_ITEMS))
                .await
                .map(|result| result.map(|stream| stream.boxed()))
        };

        let stream = stream
            .map_err(|_| Error::FetchTimeout {
                set: set_str.clone(),
                timeout,
            })?
            .map_err(|source| Error::ImapFetch {
                set: set_str.clone(),
                source,
            })?;

        Ok(stream
            .map_ok(|fetch| RawMessage::from(&fetch))
            .map_err(|source| Error::FetchMessage { source })
            .boxed())
    }

    #[instrument(name = "session::add_seen_flag", skip(self))]
    async fn add_seen_flag(&mut self, uid: u32) -> Result<()> {
        let session = self.session()?;

        let updates = session
            .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
            .await
            .map_err(|source| Error::MarkSeen { uid, source })?;

        // The store is only complete once its untagged FETCH responses are drained.
        let updates: Vec<_> = updates
            .try_collect()
            .await
            .map_err(|source| Error::MarkSeen { uid, source })?;

        debug!(updates = updates.len(), "Seen flag stored");

        Ok(())
    }

    #[instrument(name = "session::wait_for_mail", skip(self))]
    async fn wait_for_mail(&mut self) -> Result<MailboxEvent> {
        // Responses that arrived during earlier commands are reported before idling.
        self.drain_unsolicited();
        if let event @ MailboxEvent::NewMail { .. } = self.count.event() {
            return Ok(event);
        }

        let session = self.session.take().ok_or(Error::SessionClosed)?;
        let mut handle = session.idle();

        handle.init().await.map_err(|source| Error::Idle { source })?;

        debug!(keepalive_secs = self.idle_keepalive.as_secs(), "Entered IDLE");

        let (idle_wait, _interrupt) = handle.wait_with_timeout(self.idle_keepalive);
        let response = idle_wait.await.map_err(|source| Error::Idle { source })?;

        match &response {
            IdleResponse::NewData(data) => match self.count.observe(data.parsed()) {
                Observed::Bye => {
                    // The server drops the connection after BYE, so DONE cannot complete.
                    debug!("Server said BYE during IDLE");
                    return Ok(MailboxEvent::Closed);
                }
                Observed::Counted => {}
                Observed::Ignored => {
                    debug!(response = ?data.parsed(), "IDLE woke on other data");
                }
            },
            IdleResponse::Timeout => debug!("IDLE keepalive elapsed"),
            IdleResponse::ManualInterrupt => {}
        }

        let session = handle.done().await.map_err(|source| Error::Idle { source })?;
        self.session = Some(session);
        self.drain_unsolicited();

        Ok(self.count.event())
    }

    #[instrument(name = "session::logout", skip(self))]
    async fn logout(&mut self) -> Result<()> {
        let timeout = self.timeouts.logout;
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };

        debug!("Logging out");

        tokio::time::timeout(timeout, session.logout())
            .await
            .map_err(|_| Error::LogoutTimeout { timeout })?
            .map_err(|source| Error::ImapLogout { source })
    }
}
