//! Startup search criteria.
//!
//! A [`SearchQuery`] is built once when the watcher starts and rendered to IMAP
//! `SEARCH` syntax:
//!
//! ```
//! use mail_ingest::SearchQuery;
//! use chrono::NaiveDate;
//!
//! assert_eq!(SearchQuery::Unseen.to_imap(), "UNSEEN");
//!
//! let since = NaiveDate::from_ymd_opt(2025, 12, 7).unwrap();
//! assert_eq!(SearchQuery::SentSince(since).to_imap(), "SENTSINCE 07-Dec-2025");
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::time::Duration;

/// Default look-back window for [`SearchQuery::recent`].
pub const DEFAULT_SEARCH_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Immutable predicate over message metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    /// Messages without the `\Seen` flag.
    Unseen,
    /// Messages whose `Date:` header is on or after the given day.
    SentSince(NaiveDate),
}

impl SearchQuery {
    /// Messages sent within `window` of now.
    #[must_use]
    pub fn recent(window: Duration) -> Self {
        Self::recent_from(Utc::now(), window)
    }

    /// Messages sent within `window` of `now`.
    ///
    /// IMAP date searches have day granularity, so the cutoff is the calendar day
    /// (UTC) that `now - window` falls on.
    #[must_use]
    pub fn recent_from(now: DateTime<Utc>, window: Duration) -> Self {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        SearchQuery::SentSince((now - window).date_naive())
    }

    /// Renders the query as an IMAP search key.
    #[must_use]
    pub fn to_imap(&self) -> String {
        match self {
            SearchQuery::Unseen => "UNSEEN".to_string(),
            // IMAP date format: "DD-Mon-YYYY" (e.g., "07-Dec-2025")
            SearchQuery::SentSince(date) => format!("SENTSINCE {}", date.format("%d-%b-%Y")),
        }
    }
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self::recent(DEFAULT_SEARCH_WINDOW)
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_imap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_recent_crosses_day_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let query = SearchQuery::recent_from(now, DEFAULT_SEARCH_WINDOW);
        assert_eq!(query.to_imap(), "SENTSINCE 01-Jan-2024");
    }

    #[test]
    fn test_zero_window_is_today() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 23, 59, 0).unwrap();
        let query = SearchQuery::recent_from(now, Duration::ZERO);
        assert_eq!(query, SearchQuery::SentSince(now.date_naive()));
    }

    #[test]
    fn test_display_matches_imap() {
        assert_eq!(SearchQuery::Unseen.to_string(), "UNSEEN");
    }
}
