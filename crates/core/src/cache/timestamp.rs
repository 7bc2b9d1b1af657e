//! Timestamp encoding for stored rows.
//!
//! Timestamps are stored as RFC 3339 text with fixed microsecond precision and
//! a `Z` suffix. The fixed width keeps lexical order equal to chronological
//! order, which the expiry predicates in SQL rely on.

use crate::Error;
use chrono::{DateTime, Datelike, Duration, SecondsFormat, Utc};

/// Years past this render with a sign and more digits, breaking lexical order.
const LAST_FOUR_DIGIT_YEAR: i32 = 9999;

pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| Error::InvalidTimestamp(raw.to_string()))
}

/// `at + by`, or `None` when the result overflows or leaves the four-digit years.
pub(crate) fn checked_offset(at: DateTime<Utc>, by: Duration) -> Option<DateTime<Utc>> {
    at.checked_add_signed(by)
        .filter(|end| (0..=LAST_FOUR_DIGIT_YEAR).contains(&end.year()))
}
