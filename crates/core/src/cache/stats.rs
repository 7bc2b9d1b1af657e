//! Cache health statistics.

use super::connection::CacheDb;
use super::timestamp::format_timestamp;
use crate::Error;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_rusqlite::params;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Figures gathered from the backing store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSummary {
    pub total_entries: i64,
    pub active_entries: i64,
    pub expired_entries: i64,
    pub total_hits: i64,
    pub average_hits: f64,
    pub max_hits: i64,
    pub verification_entries: i64,
    pub cache_size_bytes: i64,
    pub cache_size_mb: f64,
    /// Smoothed ratio of stored hit tallies to rows, see [`smoothed_hit_rate`].
    pub hit_rate: f64,
}

/// Report returned to dashboards and tooling.
///
/// A disabled cache reports only `enabled: false`; a failed collection
/// reports `enabled: true` and `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    #[serde(flatten)]
    pub summary: Option<StatsSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CacheStats {
    pub fn disabled() -> Self {
        Self { enabled: false, summary: None, error: None }
    }

    pub fn collected(summary: StatsSummary) -> Self {
        Self { enabled: true, summary: Some(summary), error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { enabled: true, summary: None, error: Some(error.into()) }
    }
}

/// `total_hits / (total_entries + max(total_hits, 1))`, rounded to 3 places.
///
/// This is not a request hit ratio: nothing here counts requests, only the
/// hit tallies stored on rows. Do not alert on it as if it were.
pub fn smoothed_hit_rate(total_hits: i64, total_entries: i64) -> f64 {
    let denominator = total_entries + total_hits.max(1);
    round_to(total_hits as f64 / denominator as f64, 3)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

impl CacheDb {
    /// Gather statistics in one read transaction.
    pub async fn collect_stats(&self, now: DateTime<Utc>) -> Result<StatsSummary, Error> {
        let now = format_timestamp(now);
        self.conn
            .call(move |conn| -> Result<StatsSummary, Error> {
                let tx = conn.transaction()?;

                let total_entries: i64 = tx.query_row("SELECT COUNT(*) FROM lookup_cache", [], |row| row.get(0))?;

                let active_entries: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM lookup_cache WHERE expires_at > ?1",
                    params![now],
                    |row| row.get(0),
                )?;

                let (total_hits, average_hits, max_hits): (Option<i64>, Option<f64>, Option<i64>) = tx.query_row(
                    "SELECT SUM(hit_count), AVG(hit_count), MAX(hit_count) FROM lookup_cache",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?;

                let verification_entries: i64 =
                    tx.query_row("SELECT COUNT(*) FROM verification_cache", [], |row| row.get(0))?;

                let cache_size_bytes: i64 = tx.query_row(
                    "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                    [],
                    |row| row.get(0),
                )?;

                tx.commit()?;

                let total_hits = total_hits.unwrap_or(0);
                Ok(StatsSummary {
                    total_entries,
                    active_entries,
                    expired_entries: total_entries - active_entries,
                    total_hits,
                    average_hits: round_to(average_hits.unwrap_or(0.0), 2),
                    max_hits: max_hits.unwrap_or(0),
                    verification_entries,
                    cache_size_bytes,
                    cache_size_mb: round_to(cache_size_bytes as f64 / BYTES_PER_MB, 2),
                    hit_rate: smoothed_hit_rate(total_hits, total_entries),
                })
            })
            .await
            .map_err(Error::from)
    }
}
