//! Attachment persistence.
//!
//! Every message with attachments gets one directory under the store's base path,
//! named after its subject and date:
//!
//! ```
//! use mail_ingest::store::directory_name;
//! use chrono::{TimeZone, Utc};
//!
//! let date = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
//! assert_eq!(directory_name(Some("Invoice #1"), date), "invoice_#1_20240102t030405000z");
//! ```
//!
//! The name is not unique across messages sharing subject and date. Colliding
//! messages share a directory, and a file written later replaces one of the same
//! name written earlier.

use crate::error::{Error, Result};
use crate::message::{Attachment, ParsedMessage};
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, instrument, warn};

/// Default base directory for stored attachments.
pub const DEFAULT_ATTACHMENTS_DIR: &str = "attachments";

/// Subject used when a message has none.
const NO_SUBJECT: &str = "no_subject";

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static TIMESTAMP_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-:.]").expect("valid regex"));

/// Derives the directory name for a message: lower-cased subject with whitespace runs
/// collapsed to `_`, then `_`, then the ISO-8601 date with punctuation stripped.
///
/// Path separators in the subject become `_` so the name is always one component.
#[must_use]
pub fn directory_name(subject: Option<&str>, date: DateTime<Utc>) -> String {
    let subject = subject.map(str::trim).filter(|s| !s.is_empty()).unwrap_or(NO_SUBJECT);
    let slug = WHITESPACE
        .replace_all(subject, "_")
        .replace(['/', '\\', '\0'], "_");
    let timestamp = date.to_rfc3339_opts(SecondsFormat::Millis, true);
    let timestamp = TIMESTAMP_PUNCTUATION.replace_all(&timestamp, "");
    format!("{slug}_{timestamp}").to_lowercase()
}

/// Outcome of persisting one message's attachments.
#[derive(Debug, Default)]
pub struct PersistReport {
    /// Directory the attachments went to, if the message had any.
    pub directory: Option<PathBuf>,
    /// Files written, in attachment order.
    pub written: Vec<PathBuf>,
    /// Attachments that could not be written.
    pub failed: Vec<(String, Error)>,
}

impl PersistReport {
    /// Returns `true` if every attachment was written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Writes attachments below a base directory.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    base_dir: PathBuf,
}

impl Default for AttachmentStore {
    fn default() -> Self {
        Self::new(DEFAULT_ATTACHMENTS_DIR)
    }
}

impl AttachmentStore {
    /// Creates a store rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Output directory for a message, falling back to `now` when it carries no date.
    #[must_use]
    pub fn output_directory(&self, message: &ParsedMessage, now: DateTime<Utc>) -> PathBuf {
        let date = message.date.unwrap_or(now);
        self.base_dir
            .join(directory_name(message.subject.as_deref(), date))
    }

    /// Writes every attachment of `message` to its output directory.
    ///
    /// A failing attachment is logged and recorded in the report; its siblings are
    /// still written. Existing files with the same name are overwritten.
    #[instrument(
        name = "AttachmentStore::persist",
        skip_all,
        fields(subject = ?message.subject, attachments = message.attachments.len())
    )]
    pub async fn persist(&self, message: &ParsedMessage) -> PersistReport {
        let mut report = PersistReport::default();
        if message.attachments.is_empty() {
            return report;
        }

        let directory = self.output_directory(message, Utc::now());

        for attachment in &message.attachments {
            match write_attachment(&directory, attachment).await {
                Ok(path) => {
                    debug!(path = %path.display(), size = attachment.size(), "Attachment written");
                    report.written.push(path);
                }
                Err(e) => {
                    warn!(
                        filename = %attachment.filename,
                        error = %e,
                        "Failed to write attachment, continuing with the next one"
                    );
                    report.failed.push((attachment.filename.clone(), e));
                }
            }
        }

        report.directory = Some(directory);
        report
    }
}

/// Creates `directory` if needed and writes one attachment into it.
async fn write_attachment(directory: &Path, attachment: &Attachment) -> Result<PathBuf> {
    // create_dir_all succeeds when the directory already exists, including when a
    // concurrent writer created it first.
    tokio::fs::create_dir_all(directory)
        .await
        .map_err(|source| Error::CreateDirectory {
            path: directory.to_path_buf(),
            source,
        })?;

    let path = directory.join(&attachment.filename);
    tokio::fs::write(&path, &attachment.content)
        .await
        .map_err(|source| Error::WriteAttachment {
            path: path.clone(),
            source,
        })?;

    Ok(path)
}
