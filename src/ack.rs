//! Seen-flag acknowledgment of processed messages.

use crate::session::MailboxSession;
use tracing::{info, instrument, warn};

/// Marks processed messages as seen on the server.
///
/// Acknowledgment is best effort: failures are logged and never retried or
/// escalated.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeenFlagTracker;

impl SeenFlagTracker {
    /// Creates a tracker.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Sets `\Seen` on the message with `uid`. Returns `true` if the server accepted it.
    #[instrument(name = "SeenFlagTracker::mark_seen", skip(self, session))]
    pub async fn mark_seen<S: MailboxSession>(&self, session: &mut S, uid: u32) -> bool {
        match session.add_seen_flag(uid).await {
            Ok(()) => {
                info!(uid, "Marked as read");
                true
            }
            Err(e) => {
                warn!(uid, error = %e, "Failed to mark message as read");
                false
            }
        }
    }
}
