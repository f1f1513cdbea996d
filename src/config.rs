//! Configuration for the mailbox watcher.
//!
//! Use [`WatcherConfigBuilder`] to create a configuration with sensible defaults:
//!
//! ```
//! use mail_ingest::WatcherConfig;
//!
//! let config = WatcherConfig::builder()
//!     .user("user@example.com")
//!     .password("app-password")
//!     .host("imap.example.com")
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.server_address(), "imap.example.com:993");
//! ```
//!
//! Or load it from the environment (and an optional `.env` file) with
//! [`WatcherConfig::from_env`].

use crate::error::{Error, Result};
use crate::query::{SearchQuery, DEFAULT_SEARCH_WINDOW};
use crate::store::DEFAULT_ATTACHMENTS_DIR;
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for watching one mailbox.
///
/// Create using [`WatcherConfig::builder()`].
///
/// Note: The `password` field is stored as a [`SecretString`] to prevent
/// accidental logging of sensitive credentials.
#[derive(Clone)]
pub struct WatcherConfig {
    /// Login user name.
    user: String,
    /// Login password (protected from accidental logging).
    password: SecretString,
    /// IMAP server hostname.
    pub host: String,
    /// IMAP server port (default: 993).
    pub port: u16,
    /// Wrap the connection in TLS.
    pub tls: bool,
    /// Accept any server certificate. This relaxes trust and is on by default.
    pub accept_invalid_certs: bool,
    /// Mailbox to watch (default: `INBOX`).
    pub mailbox: String,
    /// Base directory for stored attachments.
    pub attachments_dir: PathBuf,
    /// Startup search criteria.
    pub search: SearchQuery,
    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
    /// How long one IDLE round lasts before it is re-issued.
    pub idle_keepalive: Duration,
}

impl std::fmt::Debug for WatcherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherConfig")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("mailbox", &self.mailbox)
            .field("attachments_dir", &self.attachments_dir)
            .field("search", &self.search)
            .field("timeouts", &self.timeouts)
            .field("idle_keepalive", &self.idle_keepalive)
            .finish()
    }
}

impl WatcherConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> WatcherConfigBuilder {
        WatcherConfigBuilder::default()
    }

    /// Loads the configuration from process environment variables, after reading a
    /// `.env` file from the working directory if one exists.
    ///
    /// | Variable | Meaning | Default |
    /// |---|---|---|
    /// | `IMAP_USER` | login user | required |
    /// | `IMAP_PASSWORD` | login password | required |
    /// | `IMAP_HOST` | server host | required |
    /// | `IMAP_PORT` | server port | `993` |
    /// | `TLS_ENABLED` | `true` enables TLS | `false` when unset |
    /// | `IMAP_ACCEPT_INVALID_CERTS` | skip certificate validation | `true` |
    /// | `IMAP_MAILBOX` | mailbox name | `INBOX` |
    /// | `ATTACHMENTS_DIR` | attachment base directory | `attachments` |
    /// | `SEARCH_CRITERIA` | `recent` (last 24 hours) or `unseen` | `recent` |
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value is invalid.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value is invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &'static str| lookup(name).ok_or(Error::MissingEnv { name });

        let mut builder = Self::builder()
            .user(required("IMAP_USER")?)
            .password(required("IMAP_PASSWORD")?)
            .host(required("IMAP_HOST")?)
            .tls(lookup("TLS_ENABLED").is_some_and(|v| v == "true"));

        if let Some(port) = lookup("IMAP_PORT") {
            let port = port.trim().parse().map_err(|_| Error::InvalidConfig {
                message: format!("IMAP_PORT is not a valid port: {port}"),
            })?;
            builder = builder.port(port);
        }
        if let Some(value) = lookup("IMAP_ACCEPT_INVALID_CERTS") {
            builder = builder.accept_invalid_certs(parse_bool("IMAP_ACCEPT_INVALID_CERTS", &value)?);
        }
        if let Some(mailbox) = lookup("IMAP_MAILBOX") {
            builder = builder.mailbox(mailbox);
        }
        if let Some(dir) = lookup("ATTACHMENTS_DIR") {
            builder = builder.attachments_dir(dir);
        }
        if let Some(criteria) = lookup("SEARCH_CRITERIA") {
            let search = match criteria.trim().to_ascii_lowercase().as_str() {
                "unseen" => SearchQuery::Unseen,
                "recent" => SearchQuery::recent(DEFAULT_SEARCH_WINDOW),
                other => {
                    return Err(Error::InvalidConfig {
                        message: format!("SEARCH_CRITERIA must be 'recent' or 'unseen', got '{other}'"),
                    })
                }
            };
            builder = builder.search(search);
        }

        builder.build()
    }

    /// Returns the login user name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Returns the password as a string slice.
    ///
    /// Use this method when you need to pass the password to authentication.
    /// The password is intentionally not directly accessible to prevent accidental logging.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Returns the full IMAP server address as "host:port".
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(Error::InvalidConfig {
            message: format!("{name} must be a boolean, got '{other}'"),
        }),
    }
}

/// Timeout configuration for remote operations.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout for establishing TCP/TLS connection.
    pub connect: Duration,
    /// Timeout for IMAP authentication.
    pub auth: Duration,
    /// Timeout for opening the mailbox.
    pub select: Duration,
    /// Timeout for a search.
    pub search: Duration,
    /// Timeout for issuing a fetch command.
    pub fetch: Duration,
    /// Timeout for logout operation.
    pub logout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            auth: Duration::from_secs(30),
            select: Duration::from_secs(10),
            search: Duration::from_secs(30),
            fetch: Duration::from_secs(60),
            logout: Duration::from_secs(5),
        }
    }
}

/// Servers drop IDLE after 30 minutes of silence (RFC 2177), so rounds end before that.
pub const DEFAULT_IDLE_KEEPALIVE: Duration = Duration::from_secs(29 * 60);

/// Builder for [`WatcherConfig`].
#[derive(Debug, Default)]
pub struct WatcherConfigBuilder {
    user: Option<String>,
    password: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    tls: Option<bool>,
    accept_invalid_certs: Option<bool>,
    mailbox: Option<String>,
    attachments_dir: Option<PathBuf>,
    search: Option<SearchQuery>,
    timeouts: Option<TimeoutConfig>,
    idle_keepalive: Option<Duration>,
}

impl WatcherConfigBuilder {
    /// Sets the login user name (required).
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the password (required).
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the IMAP server hostname (required).
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the IMAP server port. Default is 993.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Enables or disables TLS. Default is enabled.
    #[must_use]
    pub fn tls(mut self, tls: bool) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Accepts any server certificate when `true`. Default is `true`.
    #[must_use]
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = Some(accept);
        self
    }

    /// Sets the mailbox to watch. Default is `INBOX`.
    #[must_use]
    pub fn mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.mailbox = Some(mailbox.into());
        self
    }

    /// Sets the attachment base directory. Default is `attachments`.
    #[must_use]
    pub fn attachments_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.attachments_dir = Some(dir.into());
        self
    }

    /// Sets the startup search. Default is messages sent within the last 24 hours.
    #[must_use]
    pub fn search(mut self, search: SearchQuery) -> Self {
        self.search = Some(search);
        self
    }

    /// Sets timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .connect = timeout;
        self
    }

    /// Sets the IDLE keepalive interval.
    #[must_use]
    pub fn idle_keepalive(mut self, keepalive: Duration) -> Self {
        self.idle_keepalive = Some(keepalive);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing or invalid.
    pub fn build(self) -> Result<WatcherConfig> {
        let user = self
            .user
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::InvalidConfig {
                message: "user is required".into(),
            })?;

        let password = self.password.ok_or_else(|| Error::InvalidConfig {
            message: "password is required".into(),
        })?;

        let host = self
            .host
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidConfig {
                message: "host is required".into(),
            })?;

        let port = self.port.unwrap_or(993);
        if port == 0 {
            return Err(Error::InvalidConfig {
                message: "port must be non-zero".into(),
            });
        }

        let idle_keepalive = self.idle_keepalive.unwrap_or(DEFAULT_IDLE_KEEPALIVE);
        if idle_keepalive.is_zero() {
            return Err(Error::InvalidConfig {
                message: "idle keepalive must be non-zero".into(),
            });
        }

        Ok(WatcherConfig {
            user,
            password: SecretString::from(password),
            host,
            port,
            tls: self.tls.unwrap_or(true),
            accept_invalid_certs: self.accept_invalid_certs.unwrap_or(true),
            mailbox: self.mailbox.unwrap_or_else(|| "INBOX".to_string()),
            attachments_dir: self
                .attachments_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ATTACHMENTS_DIR)),
            search: self.search.unwrap_or_default(),
            timeouts: self.timeouts.unwrap_or_default(),
            idle_keepalive,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_builder_minimal() {
        let config = WatcherConfig::builder()
            .user("user@example.com")
            .password("secret")
            .host("imap.example.com")
            .build()
            .unwrap();

        assert_eq!(config.user(), "user@example.com");
        assert_eq!(config.password(), "secret");
        assert_eq!(config.port, 993);
        assert!(config.tls);
        assert!(config.accept_invalid_certs);
        assert_eq!(config.mailbox, "INBOX");
        assert_eq!(config.attachments_dir, PathBuf::from("attachments"));
        assert!(matches!(config.search, SearchQuery::SentSince(_)));
        assert_eq!(config.idle_keepalive, DEFAULT_IDLE_KEEPALIVE);
    }

    #[test]
    fn test_builder_full() {
        let config = WatcherConfig::builder()
            .user("user")
            .password("secret")
            .host("mail.example.com")
            .port(143)
            .tls(false)
            .accept_invalid_certs(false)
            .mailbox("Receipts")
            .attachments_dir("/var/spool/att")
            .search(SearchQuery::Unseen)
            .connect_timeout(Duration::from_secs(60))
            .idle_keepalive(Duration::from_secs(300))
            .build()
            .unwrap();

        assert_eq!(config.server_address(), "mail.example.com:143");
        assert!(!config.tls);
        assert!(!config.accept_invalid_certs);
        assert_eq!(config.mailbox, "Receipts");
        assert_eq!(config.search, SearchQuery::Unseen);
        assert_eq!(config.timeouts.connect, Duration::from_secs(60));
        assert_eq!(config.idle_keepalive, Duration::from_secs(300));
    }

    #[test]
    fn test_builder_missing_fields() {
        assert!(WatcherConfig::builder().password("p").host("h").build().is_err());
        assert!(WatcherConfig::builder().user("u").host("h").build().is_err());
        assert!(WatcherConfig::builder().user("u").password("p").build().is_err());
        assert!(WatcherConfig::builder()
            .user("u")
            .password("p")
            .host("   ")
            .build()
            .is_err());
    }

    #[test]
    fn test_builder_rejects_zero_port() {
        let result = WatcherConfig::builder()
            .user("u")
            .password("p")
            .host("h")
            .port(0)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_password_not_in_debug() {
        let config = WatcherConfig::builder()
            .user("user")
            .password("super-secret-password")
            .host("imap.example.com")
            .build()
            .unwrap();

        let debug_str = format!("{config:?}");
        assert!(!debug_str.contains("super-secret-password"));
        assert!(debug_str.contains("[REDACTED]"));
    }

    #[test]
    fn test_from_lookup() {
        let config = WatcherConfig::from_lookup(lookup(&[
            ("IMAP_USER", "bot@example.com"),
            ("IMAP_PASSWORD", "pw"),
            ("IMAP_HOST", "imap.example.com"),
            ("IMAP_PORT", "1993"),
            ("TLS_ENABLED", "true"),
            ("SEARCH_CRITERIA", "unseen"),
        ]))
        .unwrap();

        assert_eq!(config.server_address(), "imap.example.com:1993");
        assert!(config.tls);
        assert!(config.accept_invalid_certs);
        assert_eq!(config.search, SearchQuery::Unseen);
    }

    #[test]
    fn test_from_lookup_tls_only_when_true() {
        let config = WatcherConfig::from_lookup(lookup(&[
            ("IMAP_USER", "u"),
            ("IMAP_PASSWORD", "p"),
            ("IMAP_HOST", "h"),
        ]))
        .unwrap();
        assert!(!config.tls);
        assert_eq!(config.port, 993);
    }

    #[test]
    fn test_from_lookup_missing_variable() {
        let err = WatcherConfig::from_lookup(lookup(&[("IMAP_USER", "u")])).unwrap_err();
        assert!(matches!(err, Error::MissingEnv { name: "IMAP_PASSWORD" }));
    }

    #[test]
    fn test_from_lookup_invalid_values() {
        let base = [("IMAP_USER", "u"), ("IMAP_PASSWORD", "p"), ("IMAP_HOST", "h")];

        let mut vars = base.to_vec();
        vars.push(("IMAP_PORT", "imap"));
        assert!(WatcherConfig::from_lookup(lookup(&vars)).is_err());

        let mut vars = base.to_vec();
        vars.push(("IMAP_ACCEPT_INVALID_CERTS", "maybe"));
        assert!(WatcherConfig::from_lookup(lookup(&vars)).is_err());

        let mut vars = base.to_vec();
        vars.push(("SEARCH_CRITERIA", "all"));
        assert!(WatcherConfig::from_lookup(lookup(&vars)).is_err());
    }
}
