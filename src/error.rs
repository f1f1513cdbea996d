//! Error types for the mail-ingest crate.
//!
//! All errors implement [`std::error::Error`] and provide context about what went wrong.
//! Errors are grouped by how far their damage reaches - see [`Error::escalates`] and
//! [`Error::category`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while watching a mailbox and ingesting messages.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration errors (escalate, NOT retryable)
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid configuration provided.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// A required environment variable is not set.
    #[error("missing environment variable {name}")]
    MissingEnv {
        /// Name of the variable.
        name: &'static str,
    },

    /// Invalid DNS name for TLS.
    #[error("invalid DNS name for host '{host}'")]
    InvalidDnsName {
        /// The invalid hostname.
        host: String,
        /// The underlying DNS name error.
        #[source]
        source: rustls::client::InvalidDnsNameError,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Transport errors (escalate, fatal to the session)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to establish TCP connection.
    #[error("failed to connect to {target}")]
    TcpConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to establish TLS connection.
    #[error("failed to establish TLS connection to {target}")]
    TlsConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Connection timeout.
    #[error("connection timeout to {target} after {timeout:?}")]
    ConnectTimeout {
        /// The target address.
        target: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// IMAP login failed.
    #[error("IMAP login failed for {user}")]
    ImapLogin {
        /// The user name used for login.
        user: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Authentication timeout.
    #[error("authentication timeout for {user} after {timeout:?}")]
    AuthTimeout {
        /// The user name used for authentication.
        user: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Failed to open the mailbox read-write.
    #[error("failed to open mailbox '{mailbox}'")]
    SelectMailbox {
        /// The mailbox name.
        mailbox: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Mailbox selection timeout.
    #[error("mailbox selection timeout for '{mailbox}' after {timeout:?}")]
    SelectTimeout {
        /// The mailbox name.
        mailbox: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// IDLE command failed or the connection dropped while idling.
    #[error("IMAP IDLE failed")]
    Idle {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// The session was used after it had been closed.
    #[error("IMAP session is closed")]
    SessionClosed,

    /// IMAP logout failed.
    #[error("IMAP logout failed")]
    ImapLogout {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Logout timeout (not critical).
    #[error("logout timeout after {timeout:?}")]
    LogoutTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Search / fetch errors (escalate, abort the current batch)
    // ─────────────────────────────────────────────────────────────────────────
    /// IMAP search failed.
    #[error("IMAP search failed for query '{query}'")]
    ImapSearch {
        /// The search query that failed.
        query: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Search timeout.
    #[error("search timeout for query '{query}' after {timeout:?}")]
    SearchTimeout {
        /// The search query.
        query: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// IMAP fetch command failed.
    #[error("IMAP fetch failed for message set {set}")]
    ImapFetch {
        /// The message set that failed.
        set: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Fetch timeout.
    #[error("fetch timeout for message set {set} after {timeout:?}")]
    FetchTimeout {
        /// The message set being fetched.
        set: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Failed to read a message from the fetch stream.
    #[error("failed to fetch message from stream")]
    FetchMessage {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Per-message errors (isolated, logged)
    // ─────────────────────────────────────────────────────────────────────────
    /// The fetched bytes could not be decoded as a MIME message.
    #[error("malformed message: {reason}")]
    MalformedMessage {
        /// What was wrong with the message.
        reason: String,
        /// The underlying parse error, when the MIME decoder produced one.
        #[source]
        source: Option<mailparse::MailParseError>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Per-attachment errors (isolated, logged)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to create the output directory for a message.
    #[error("failed to create directory {}", path.display())]
    CreateDirectory {
        /// The directory path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write an attachment to disk.
    #[error("failed to write attachment {}", path.display())]
    WriteAttachment {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Side-effect errors (logged only)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to set the seen flag on a message.
    #[error("failed to mark UID {uid} as seen")]
    MarkSeen {
        /// The message UID.
        uid: u32,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Downstream hand-off of an attachment failed.
    #[error("failed to deliver attachment '{filename}': {message}")]
    Delivery {
        /// The attachment filename.
        filename: String,
        /// Description of the failure.
        message: String,
    },
}

impl Error {
    /// Returns `true` if this error must be surfaced to the caller instead of being logged
    /// and skipped.
    ///
    /// Configuration, transport, search and fetch errors compromise the session or the
    /// current batch. Message, attachment, acknowledgment and delivery errors are scoped
    /// to one message or one file and never escalate.
    #[must_use]
    pub fn escalates(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Configuration | ErrorCategory::Transport | ErrorCategory::Operation
        )
    }

    /// Returns `true` if this error represents a transient failure that a reconnect
    /// policy outside the core might retry.
    ///
    /// Nothing inside this crate retries automatically.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::ConnectTimeout { .. }
            | Error::ImapLogin { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectMailbox { .. }
            | Error::SelectTimeout { .. }
            | Error::Idle { .. }
            | Error::SessionClosed
            | Error::ImapSearch { .. }
            | Error::SearchTimeout { .. }
            | Error::ImapFetch { .. }
            | Error::FetchTimeout { .. }
            | Error::FetchMessage { .. } => true,

            Error::InvalidConfig { .. }
            | Error::MissingEnv { .. }
            | Error::InvalidDnsName { .. }
            | Error::ImapLogout { .. }
            | Error::LogoutTimeout { .. }
            | Error::MalformedMessage { .. }
            | Error::CreateDirectory { .. }
            | Error::WriteAttachment { .. }
            | Error::MarkSeen { .. }
            | Error::Delivery { .. } => false,
        }
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidConfig { .. }
            | Error::MissingEnv { .. }
            | Error::InvalidDnsName { .. } => ErrorCategory::Configuration,

            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::ConnectTimeout { .. }
            | Error::ImapLogin { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectMailbox { .. }
            | Error::SelectTimeout { .. }
            | Error::Idle { .. }
            | Error::SessionClosed
            | Error::ImapLogout { .. }
            | Error::LogoutTimeout { .. } => ErrorCategory::Transport,

            Error::ImapSearch { .. }
            | Error::SearchTimeout { .. }
            | Error::ImapFetch { .. }
            | Error::FetchTimeout { .. }
            | Error::FetchMessage { .. } => ErrorCategory::Operation,

            Error::MalformedMessage { .. } => ErrorCategory::Message,

            Error::CreateDirectory { .. } | Error::WriteAttachment { .. } => ErrorCategory::Storage,

            Error::MarkSeen { .. } => ErrorCategory::Acknowledgment,

            Error::Delivery { .. } => ErrorCategory::Delivery,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedMessage {
            reason: reason.into(),
            source: None,
        }
    }
}

/// Error categories for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration or validation errors.
    Configuration,
    /// Connection-level errors, fatal to the session.
    Transport,
    /// Search or fetch failures, fatal to the current batch.
    Operation,
    /// A message that could not be decoded.
    Message,
    /// Filesystem errors while persisting attachments.
    Storage,
    /// Failed seen-flag acknowledgment.
    Acknowledgment,
    /// Failed downstream hand-off.
    Delivery,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Transport => write!(f, "transport"),
            ErrorCategory::Operation => write!(f, "operation"),
            ErrorCategory::Message => write!(f, "message"),
            ErrorCategory::Storage => write!(f, "storage"),
            ErrorCategory::Acknowledgment => write!(f, "acknowledgment"),
            ErrorCategory::Delivery => write!(f, "delivery"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation_policy() {
        let err = Error::TcpConnect {
            target: "imap.example.com:993".into(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(err.escalates());

        let err = Error::SearchTimeout {
            query: "UNSEEN".into(),
            timeout: Duration::from_secs(30),
        };
        assert!(err.escalates());

        // Scoped to one message
        assert!(!Error::malformed("truncated boundary").escalates());

        // Scoped to one attachment
        let err = Error::WriteAttachment {
            path: PathBuf::from("attachments/x/a.pdf"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!err.escalates());

        let err = Error::Delivery {
            filename: "a.pdf".into(),
            message: "endpoint unreachable".into(),
        };
        assert!(!err.escalates());
    }

    #[test]
    fn test_retryable_classification() {
        let err = Error::InvalidConfig {
            message: "host is required".into(),
        };
        assert!(!err.is_retryable());

        assert!(Error::SessionClosed.is_retryable());
        assert!(!Error::malformed("no headers").is_retryable());
    }

    #[test]
    fn test_error_categories() {
        let err = Error::MissingEnv { name: "IMAP_USER" };
        assert_eq!(err.category(), ErrorCategory::Configuration);

        let err = Error::ConnectTimeout {
            target: "imap.example.com:993".into(),
            timeout: Duration::from_secs(10),
        };
        assert_eq!(err.category(), ErrorCategory::Transport);

        let err = Error::FetchTimeout {
            set: "1:5".into(),
            timeout: Duration::from_secs(10),
        };
        assert_eq!(err.category(), ErrorCategory::Operation);

        assert_eq!(
            Error::malformed("bad").category().to_string(),
            "message"
        );
    }
}
