//! Message handles and decoded message records.

use chrono::{DateTime, Utc};
use std::fmt;

/// A server-assigned reference to one or more mailbox messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageSet {
    /// Unique identifiers, as returned by `UID SEARCH`.
    Uids(Vec<u32>),
    /// An inclusive range of sequence numbers.
    ///
    /// Only valid against the mailbox state at the moment it was computed.
    Sequence {
        /// First sequence number.
        start: u32,
        /// Last sequence number.
        end: u32,
    },
}

impl MessageSet {
    /// Builds a UID set, sorted and deduplicated.
    #[must_use]
    pub fn uids(uids: impl IntoIterator<Item = u32>) -> Self {
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        uids.dedup();
        MessageSet::Uids(uids)
    }

    /// Builds the sequence range of the `count` newest messages in a mailbox holding
    /// `total` messages: `[total - count + 1, total]`.
    ///
    /// Returns `None` when the range would be empty or reach below sequence number 1.
    #[must_use]
    pub fn newest(total: u32, count: u32) -> Option<Self> {
        if count == 0 || count > total {
            return None;
        }
        Some(MessageSet::Sequence {
            start: total - count + 1,
            end: total,
        })
    }

    /// Returns `true` if the set references no message.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            MessageSet::Uids(uids) => uids.is_empty(),
            MessageSet::Sequence { start, end } => start > end,
        }
    }

    /// Number of messages referenced by the set.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            MessageSet::Uids(uids) => uids.len(),
            MessageSet::Sequence { start, end } => {
                end.checked_sub(*start).map_or(0, |span| span as usize + 1)
            }
        }
    }

    /// Returns `true` if the set holds unique identifiers rather than sequence numbers.
    #[must_use]
    pub fn is_uid(&self) -> bool {
        matches!(self, MessageSet::Uids(_))
    }

    /// Renders the set in IMAP sequence-set syntax, collapsing consecutive UIDs into
    /// ranges.
    #[must_use]
    pub fn to_imap(&self) -> String {
        match self {
            MessageSet::Uids(uids) => {
                let mut parts: Vec<String> = Vec::new();
                let mut iter = uids.iter().copied().peekable();
                while let Some(first) = iter.next() {
                    let mut last = first;
                    while let Some(next) = last.checked_add(1).filter(|n| iter.peek() == Some(n)) {
                        last = next;
                        iter.next();
                    }
                    if first == last {
                        parts.push(first.to_string());
                    } else {
                        parts.push(format!("{first}:{last}"));
                    }
                }
                parts.join(",")
            }
            MessageSet::Sequence { start, end } if start == end => start.to_string(),
            MessageSet::Sequence { start, end } => format!("{start}:{end}"),
        }
    }
}

impl fmt::Display for MessageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_imap())
    }
}

/// Undecoded bytes fetched for one message.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Sequence number at fetch time.
    pub seq: u32,
    /// Unique identifier, if the server returned one.
    pub uid: Option<u32>,
    /// The full RFC 822 message, headers and content together.
    pub body: Option<Vec<u8>>,
}

impl From<&async_imap::types::Fetch> for RawMessage {
    fn from(fetch: &async_imap::types::Fetch) -> Self {
        Self {
            seq: fetch.message,
            uid: fetch.uid,
            body: fetch.body().map(<[u8]>::to_vec),
        }
    }
}

/// How a part asked to be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// `Content-Disposition: attachment`.
    Attachment,
    /// `inline`, or no disposition header.
    Inline,
}

/// One file carried by a message.
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name, reduced to a single path component.
    pub filename: String,
    /// `true` when the part declared no file name and one was made up.
    pub generated_name: bool,
    /// Declared MIME type, lower-cased.
    pub content_type: String,
    /// Declared disposition.
    pub disposition: Disposition,
    /// `Content-ID` without angle brackets.
    pub content_id: Option<String>,
    /// Decoded content bytes.
    pub content: Vec<u8>,
}

impl Attachment {
    /// Size of the decoded content in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("generated_name", &self.generated_name)
            .field("content_type", &self.content_type)
            .field("disposition", &self.disposition)
            .field("content_id", &self.content_id)
            .field("size", &self.content.len())
            .finish()
    }
}

/// A decoded message.
#[derive(Debug, Clone, Default)]
pub struct ParsedMessage {
    /// Decoded `From:` header.
    pub from: Option<String>,
    /// Decoded `To:` header.
    pub to: Option<String>,
    /// Decoded `Subject:` header.
    pub subject: Option<String>,
    /// Parsed `Date:` header.
    pub date: Option<DateTime<Utc>>,
    /// `Message-ID:` header.
    pub message_id: Option<String>,
    /// Plain-text body.
    pub text: Option<String>,
    /// HTML body.
    pub html: Option<String>,
    /// Attachments in the order they appear in the MIME tree.
    pub attachments: Vec<Attachment>,
}

impl ParsedMessage {
    /// File names of all attachments, in order.
    #[must_use]
    pub fn attachment_names(&self) -> Vec<&str> {
        self.attachments.iter().map(|a| a.filename.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_set_collapses_ranges() {
        let set = MessageSet::uids([7, 3, 4, 5, 9, 4]);
        assert_eq!(set.to_imap(), "3:5,7,9");
        assert_eq!(set.len(), 5);
        assert!(set.is_uid());
    }

    #[test]
    fn test_uid_set_ending_at_max_uid() {
        let set = MessageSet::uids([u32::MAX - 1, u32::MAX]);
        assert_eq!(set.to_imap(), format!("{}:{}", u32::MAX - 1, u32::MAX));

        let set = MessageSet::uids([1, u32::MAX]);
        assert_eq!(set.to_imap(), format!("1,{}", u32::MAX));
    }

    #[test]
    fn test_newest_range() {
        let set = MessageSet::newest(10, 3).unwrap();
        assert_eq!(set, MessageSet::Sequence { start: 8, end: 10 });
        assert_eq!(set.to_imap(), "8:10");
        assert_eq!(set.len(), 3);

        assert_eq!(MessageSet::newest(5, 1).unwrap().to_imap(), "5");
    }

    #[test]
    fn test_newest_rejects_impossible_counts() {
        assert!(MessageSet::newest(10, 0).is_none());
        assert!(MessageSet::newest(2, 3).is_none());
    }

    #[test]
    fn test_empty_uid_set() {
        let set = MessageSet::uids([]);
        assert!(set.is_empty());
        assert_eq!(set.to_imap(), "");
    }

    #[test]
    fn test_attachment_debug_omits_content() {
        let attachment = Attachment {
            filename: "a.bin".into(),
            generated_name: false,
            content_type: "application/octet-stream".into(),
            disposition: Disposition::Attachment,
            content_id: None,
            content: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let debug = format!("{attachment:?}");
        assert!(debug.contains("size: 4"));
        assert!(!debug.contains("222"));
    }
}
