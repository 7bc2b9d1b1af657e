//! Contact verification results.
//!
//! Keyed by (identifier, identifier type). Freshness is a fixed seven-day
//! window from `verified_at`; there is no per-entry TTL.

use super::connection::CacheDb;
use super::entries::require_non_empty;
use super::timestamp::{format_timestamp, parse_timestamp};
use crate::Error;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// How long a verification outcome stays usable.
pub const VERIFICATION_WINDOW_DAYS: i64 = 7;

/// Oldest `verified_at` still considered fresh at `now` (exclusive).
pub fn verification_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(VERIFICATION_WINDOW_DAYS)
}

/// A cached verification outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationEntry {
    pub identifier: String,
    pub identifier_type: String,
    pub is_valid: bool,
    pub confidence_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub verified_at: DateTime<Utc>,
    pub cached: bool,
}

impl CacheDb {
    /// Get a verification outcome if it was recorded within the window.
    pub async fn get_verification(
        &self, identifier: &str, identifier_type: &str, now: DateTime<Utc>,
    ) -> Result<Option<VerificationEntry>, Error> {
        require_non_empty("identifier", identifier)?;
        require_non_empty("identifier_type", identifier_type)?;

        let identifier = identifier.to_string();
        let identifier_type = identifier_type.to_string();
        let cutoff = format_timestamp(verification_cutoff(now));

        self.conn
            .call(move |conn| -> Result<Option<VerificationEntry>, Error> {
                let result = conn.query_row(
                    "SELECT is_valid, confidence_score, details, verified_at
                     FROM verification_cache
                     WHERE identifier = ?1 AND identifier_type = ?2 AND verified_at > ?3",
                    params![identifier, identifier_type, cutoff],
                    |row| {
                        Ok((
                            row.get::<_, bool>(0)?,
                            row.get::<_, f64>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                );

                let (is_valid, confidence_score, details, verified_at) = match result {
                    Ok(row) => row,
                    Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                    Err(e) => return Err(e.into()),
                };

                let details = match details {
                    Some(json) => Some(serde_json::from_str(&json)?),
                    None => None,
                };

                Ok(Some(VerificationEntry {
                    identifier,
                    identifier_type,
                    is_valid,
                    confidence_score,
                    details,
                    verified_at: parse_timestamp(&verified_at)?,
                    cached: true,
                }))
            })
            .await
            .map_err(Error::from)
    }

    /// Record a verification outcome, replacing any previous one for the pair.
    ///
    /// `verified_at` is set to `now`.
    pub async fn put_verification(
        &self, identifier: &str, identifier_type: &str, is_valid: bool, confidence_score: f64,
        details: Option<&Value>, now: DateTime<Utc>,
    ) -> Result<(), Error> {
        require_non_empty("identifier", identifier)?;
        require_non_empty("identifier_type", identifier_type)?;
        if !(0.0..=1.0).contains(&confidence_score) {
            return Err(Error::InvalidInput(format!(
                "confidence_score must be within [0, 1], got {confidence_score}"
            )));
        }

        let identifier = identifier.to_string();
        let identifier_type = identifier_type.to_string();
        let details = details.map(serde_json::to_string).transpose()?;
        let verified_at = format_timestamp(now);

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO verification_cache
                        (identifier, identifier_type, is_valid, confidence_score, verified_at, details)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(identifier, identifier_type) DO UPDATE SET
                        is_valid = excluded.is_valid,
                        confidence_score = excluded.confidence_score,
                        verified_at = excluded.verified_at,
                        details = excluded.details",
                    params![identifier, identifier_type, is_valid, confidence_score, verified_at, details],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete verification outcomes older than the window at `now`.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_stale_verifications(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let cutoff = format_timestamp(verification_cutoff(now));
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM verification_cache WHERE verified_at < ?1", params![cutoff])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
