//! Downstream hand-off of stored attachments.
//!
//! After an attachment is written, the fetcher offers it to an [`AttachmentSink`].
//! The default [`NoopSink`] does nothing. With the `http-sink` feature, `HttpSink`
//! forwards each attachment to a processing endpoint.
//!
//! # Example
//!
//! ```
//! use mail_ingest::sink::{AttachmentDelivery, AttachmentSink};
//! use mail_ingest::Result;
//!
//! struct Logged;
//!
//! impl AttachmentSink for Logged {
//!     async fn deliver(&self, delivery: AttachmentDelivery<'_>) -> Result<()> {
//!         println!("{} from {:?}", delivery.attachment.filename, delivery.from);
//!         Ok(())
//!     }
//! }
//! ```

use crate::error::Result;
use crate::message::{Attachment, ParsedMessage};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::path::Path;

/// One attachment offered to a sink, with the message context it came from.
#[derive(Debug, Clone, Copy)]
pub struct AttachmentDelivery<'a> {
    /// The attachment.
    pub attachment: &'a Attachment,
    /// Where it was written.
    pub stored_at: &'a Path,
    /// Message subject.
    pub subject: Option<&'a str>,
    /// Message date.
    pub date: Option<DateTime<Utc>>,
    /// Message sender.
    pub from: Option<&'a str>,
}

impl<'a> AttachmentDelivery<'a> {
    /// Builds a delivery for `attachment` of `message`.
    #[must_use]
    pub fn new(message: &'a ParsedMessage, attachment: &'a Attachment, stored_at: &'a Path) -> Self {
        Self {
            attachment,
            stored_at,
            subject: message.subject.as_deref(),
            date: message.date,
            from: message.from.as_deref(),
        }
    }
}

/// Receives every attachment once it has been stored.
///
/// Errors are logged by the caller and never stop the pipeline.
pub trait AttachmentSink: Send + Sync {
    /// Hands one attachment downstream.
    fn deliver(&self, delivery: AttachmentDelivery<'_>) -> impl Future<Output = Result<()>> + Send;
}

/// Sink that accepts and drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl AttachmentSink for NoopSink {
    async fn deliver(&self, _delivery: AttachmentDelivery<'_>) -> Result<()> {
        Ok(())
    }
}

#[cfg(feature = "http-sink")]
pub use http::HttpSink;

#[cfg(feature = "http-sink")]
mod http {
    use super::{AttachmentDelivery, AttachmentSink};
    use crate::error::{Error, Result};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::Serialize;
    use tracing::{debug, warn};

    /// Header carrying the endpoint's authentication token.
    const TOKEN_HEADER: &str = "token";

    #[derive(Debug, Serialize)]
    struct Payload {
        attachment: String,
        filename: String,
        content_type: String,
        subject: Option<String>,
        date: Option<String>,
        from: Option<String>,
    }

    /// Posts each attachment as JSON to a processing endpoint.
    ///
    /// Requests run on their own task; `deliver` returns once the request is
    /// spawned and the response is only logged.
    pub struct HttpSink {
        client: reqwest::Client,
        endpoint: String,
        token: secrecy::SecretString,
    }

    impl std::fmt::Debug for HttpSink {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("HttpSink")
                .field("endpoint", &self.endpoint)
                .field("token", &"[REDACTED]")
                .finish_non_exhaustive()
        }
    }

    impl HttpSink {
        /// Creates a sink posting to `endpoint` with `token`.
        #[must_use]
        pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
            Self {
                client: reqwest::Client::new(),
                endpoint: endpoint.into(),
                token: secrecy::SecretString::from(token.into()),
            }
        }
    }

    impl AttachmentSink for HttpSink {
        async fn deliver(&self, delivery: AttachmentDelivery<'_>) -> Result<()> {
            use secrecy::ExposeSecret;

            let filename = delivery.attachment.filename.clone();
            let payload = Payload {
                attachment: STANDARD.encode(&delivery.attachment.content),
                filename: filename.clone(),
                content_type: delivery.attachment.content_type.clone(),
                subject: delivery.subject.map(str::to_string),
                date: delivery.date.map(|d| d.to_rfc3339()),
                from: delivery.from.map(str::to_string),
            };

            let request = self
                .client
                .post(&self.endpoint)
                .header(TOKEN_HEADER, self.token.expose_secret())
                .json(&payload);

            let handle = tokio::runtime::Handle::try_current().map_err(|e| Error::Delivery {
                filename: filename.clone(),
                message: e.to_string(),
            })?;

            handle.spawn(async move {
                match request.send().await {
                    Ok(response) => {
                        debug!(filename = %filename, status = %response.status(), "Attachment delivered");
                    }
                    Err(e) => warn!(filename = %filename, error = %e, "Attachment delivery failed"),
                }
            });

            Ok(())
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Disposition;

    #[tokio::test]
    async fn test_noop_sink_accepts() {
        let attachment = Attachment {
            filename: "a.txt".into(),
            generated_name: false,
            content_type: "text/plain".into(),
            disposition: Disposition::Attachment,
            content_id: None,
            content: b"x".to_vec(),
        };
        let message = ParsedMessage {
            subject: Some("s".into()),
            ..ParsedMessage::default()
        };
        let delivery = AttachmentDelivery::new(&message, &attachment, Path::new("/tmp/a.txt"));
        assert_eq!(delivery.subject, Some("s"));
        assert!(NoopSink.deliver(delivery).await.is_ok());
    }
}
