//! Batch processing of fetched messages.
//!
//! For one [`MessageSet`] the fetcher streams the raw messages, parses each one,
//! persists its attachments, hands them to the configured sink and finally marks
//! every fetched message as seen.

use crate::ack::SeenFlagTracker;
use crate::error::{Error, Result};
use crate::message::{MessageSet, ParsedMessage, RawMessage};
use crate::parser;
use crate::session::MailboxSession;
use crate::sink::{AttachmentDelivery, AttachmentSink, NoopSink};
use crate::store::{AttachmentStore, PersistReport};
use futures::StreamExt;
use tracing::{debug, info, instrument, warn};

/// Counters for one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Messages received from the server.
    pub fetched: usize,
    /// Messages that parsed successfully.
    pub parsed: usize,
    /// Messages that could not be parsed.
    pub malformed: usize,
    /// Attachment files written.
    pub attachments_written: usize,
    /// Attachments that could not be written.
    pub attachments_failed: usize,
    /// Messages marked as seen.
    pub acknowledged: usize,
    /// Messages whose seen flag could not be set.
    pub ack_failed: usize,
}

/// Fetches, parses, stores and acknowledges batches of messages.
#[derive(Debug, Clone, Default)]
pub struct MessageFetcher<K = NoopSink> {
    store: AttachmentStore,
    tracker: SeenFlagTracker,
    sink: K,
}

impl MessageFetcher {
    /// Creates a fetcher writing to `store` without a downstream sink.
    #[must_use]
    pub fn new(store: AttachmentStore) -> Self {
        Self {
            store,
            tracker: SeenFlagTracker::new(),
            sink: NoopSink,
        }
    }
}

impl<K: AttachmentSink> MessageFetcher<K> {
    /// Replaces the downstream sink.
    #[must_use]
    pub fn with_sink<T: AttachmentSink>(self, sink: T) -> MessageFetcher<T> {
        MessageFetcher {
            store: self.store,
            tracker: self.tracker,
            sink,
        }
    }

    /// Returns the attachment store.
    #[must_use]
    pub fn store(&self) -> &AttachmentStore {
        &self.store
    }

    /// Processes every message in `set`.
    ///
    /// Malformed messages, write failures and sink failures are logged and counted.
    /// Every fetched message is acknowledged once the stream is exhausted, whether or
    /// not it parsed. If the stream itself fails, the messages received so far are
    /// still acknowledged before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch cannot be issued or the stream breaks.
    #[instrument(name = "MessageFetcher::fetch", skip(self, session), fields(set = %set))]
    pub async fn fetch<S: MailboxSession>(
        &self,
        session: &mut S,
        set: &MessageSet,
    ) -> Result<FetchReport> {
        let mut report = FetchReport::default();
        if set.is_empty() {
            debug!("Nothing to fetch");
            return Ok(report);
        }

        let mut uids = Vec::new();
        let mut stream_error = None;

        {
            let mut messages = session.fetch(set).await?;
            while let Some(item) = messages.next().await {
                match item {
                    Ok(raw) => {
                        report.fetched += 1;
                        match raw.uid {
                            Some(uid) => uids.push(uid),
                            None => warn!(seq = raw.seq, "Message has no UID, it will not be acknowledged"),
                        }
                        self.process(&raw, &mut report).await;
                    }
                    Err(e) => {
                        stream_error = Some(e);
                        break;
                    }
                }
            }
        }

        for uid in uids {
            if self.tracker.mark_seen(session, uid).await {
                report.acknowledged += 1;
            } else {
                report.ack_failed += 1;
            }
        }

        if let Some(e) = stream_error {
            warn!(error = %e, fetched = report.fetched, "Fetch stream failed");
            return Err(e);
        }

        debug!(?report, "Batch processed");

        Ok(report)
    }

    /// Parses, stores and delivers one message.
    async fn process(&self, raw: &RawMessage, report: &mut FetchReport) {
        let parsed = match raw.body.as_deref() {
            Some(body) => parser::parse(body),
            None => Err(Error::malformed("message has no body")),
        };

        let message = match parsed {
            Ok(message) => message,
            Err(e) => {
                report.malformed += 1;
                warn!(seq = raw.seq, uid = ?raw.uid, error = %e, "Skipping malformed message");
                return;
            }
        };
        report.parsed += 1;

        log_summary(&message);

        let persisted = self.store.persist(&message).await;
        report.attachments_written += persisted.written.len();
        report.attachments_failed += persisted.failed.len();

        self.deliver(&message, &persisted).await;
    }

    /// Offers every written attachment to the sink.
    async fn deliver(&self, message: &ParsedMessage, persisted: &PersistReport) {
        let Some(directory) = persisted.directory.as_deref() else {
            return;
        };

        for attachment in &message.attachments {
            let path = directory.join(&attachment.filename);
            if !persisted.written.contains(&path) {
                continue;
            }
            let delivery = AttachmentDelivery::new(message, attachment, &path);
            if let Err(e) = self.sink.deliver(delivery).await {
                warn!(filename = %attachment.filename, error = %e, "Sink rejected attachment");
            }
        }
    }
}

fn log_summary(message: &ParsedMessage) {
    info!(
        from = message.from.as_deref().unwrap_or("-"),
        date = ?message.date,
        subject = message.subject.as_deref().unwrap_or("-"),
        text = message.text.as_deref().unwrap_or(""),
        attachments = ?message.attachment_names(),
        "Message received"
    );
}
