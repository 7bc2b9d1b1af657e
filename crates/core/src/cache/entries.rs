//! General lookup entries.
//!
//! Stores one JSON payload per (entity name, data kind) fingerprint, with a
//! per-write expiry and a hit counter that survives overwrites.

use super::connection::CacheDb;
use super::hash::compute_cache_key;
use super::timestamp::{checked_offset, format_timestamp, parse_timestamp};
use crate::Error;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, TransactionBehavior};

/// Longest lifetime a single entry may be given: one year.
pub const MAX_TTL_HOURS: i64 = 24 * 365;

/// When an entry written at `now` with `ttl` expires.
///
/// # Errors
///
/// Returns `Error::InvalidInput` if `ttl` is not positive, is longer than
/// [`MAX_TTL_HOURS`], or would end past the last representable year.
pub fn entry_expiry(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, Error> {
    if ttl <= Duration::zero() {
        return Err(Error::InvalidInput(format!("ttl must be positive, got {ttl}")));
    }
    if ttl > Duration::hours(MAX_TTL_HOURS) {
        return Err(Error::InvalidInput(format!("ttl must not exceed {MAX_TTL_HOURS} hours, got {ttl}")));
    }
    checked_offset(now, ttl).ok_or_else(|| Error::InvalidInput(format!("ttl {ttl} from {now} is out of range")))
}

/// A cache hit as seen by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedLookup {
    pub data: Value,
    pub source_urls: Vec<String>,
    /// True when served from the cache, false when freshly fetched.
    pub cached: bool,
    pub expires_at: DateTime<Utc>,
    /// Hit count after this read. Zero for fresh fetches.
    pub hit_count: i64,
}

/// A stored row, for inspection and debugging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub entity_name: String,
    pub data_kind: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: i64,
    pub source_urls: Vec<String>,
}

const ENTRY_COLUMNS: &str =
    "cache_key, entity_name, data_kind, payload, created_at, expires_at, hit_count, source_urls";

struct RawEntry {
    key: String,
    entity_name: String,
    data_kind: String,
    payload: String,
    created_at: String,
    expires_at: String,
    hit_count: i64,
    source_urls: Option<String>,
}

impl RawEntry {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            entity_name: row.get(1)?,
            data_kind: row.get(2)?,
            payload: row.get(3)?,
            created_at: row.get(4)?,
            expires_at: row.get(5)?,
            hit_count: row.get(6)?,
            source_urls: row.get(7)?,
        })
    }
}

impl TryFrom<RawEntry> for CacheEntry {
    type Error = Error;

    fn try_from(raw: RawEntry) -> Result<Self, Error> {
        Ok(Self {
            key: raw.key,
            entity_name: raw.entity_name,
            data_kind: raw.data_kind,
            payload: serde_json::from_str(&raw.payload)?,
            created_at: parse_timestamp(&raw.created_at)?,
            expires_at: parse_timestamp(&raw.expires_at)?,
            hit_count: raw.hit_count,
            source_urls: decode_urls(raw.source_urls.as_deref())?,
        })
    }
}

fn decode_urls(raw: Option<&str>) -> Result<Vec<String>, Error> {
    match raw {
        Some(json) => Ok(serde_json::from_str(json)?),
        None => Ok(Vec::new()),
    }
}

fn encode_urls(urls: &[String]) -> Result<Option<String>, Error> {
    if urls.is_empty() { Ok(None) } else { Ok(Some(serde_json::to_string(urls)?)) }
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}

impl CacheDb {
    /// Read a live entry and count the hit.
    ///
    /// Returns None if the key doesn't exist or has expired at `now`. Expired
    /// rows are left for [`CacheDb::purge_expired_entries`]. The lookup and
    /// the increment run in one immediate transaction.
    pub async fn get_entry(
        &self, entity_name: &str, data_kind: &str, now: DateTime<Utc>,
    ) -> Result<Option<CachedLookup>, Error> {
        require_non_empty("entity_name", entity_name)?;
        require_non_empty("data_kind", data_kind)?;

        let key = compute_cache_key(entity_name, data_kind);
        let now = format_timestamp(now);

        self.conn
            .call(move |conn| -> Result<Option<CachedLookup>, Error> {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let result = tx.query_row(
                    "SELECT payload, source_urls, expires_at, hit_count
                     FROM lookup_cache
                     WHERE cache_key = ?1 AND expires_at > ?2",
                    params![key, now],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                );

                let (payload, source_urls, expires_at, hit_count) = match result {
                    Ok(row) => row,
                    Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                    Err(e) => return Err(e.into()),
                };

                let lookup = CachedLookup {
                    data: serde_json::from_str(&payload)?,
                    source_urls: decode_urls(source_urls.as_deref())?,
                    cached: true,
                    expires_at: parse_timestamp(&expires_at)?,
                    hit_count: hit_count + 1,
                };

                tx.execute(
                    "UPDATE lookup_cache SET hit_count = hit_count + 1 WHERE cache_key = ?1",
                    params![key],
                )?;
                tx.commit()?;

                Ok(Some(lookup))
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or overwrite an entry.
    ///
    /// A single upsert statement: every column is replaced except
    /// `hit_count`, which starts at 0 on insert and is otherwise kept.
    pub async fn put_entry(
        &self, entity_name: &str, data_kind: &str, payload: &Value, source_urls: &[String], ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        require_non_empty("entity_name", entity_name)?;
        require_non_empty("data_kind", data_kind)?;
        let expires_at = format_timestamp(entry_expiry(now, ttl)?);

        let key = compute_cache_key(entity_name, data_kind);
        let entity_name = entity_name.to_string();
        let data_kind = data_kind.to_string();
        let payload_json = serde_json::to_string(payload)?;
        let urls_json = encode_urls(source_urls)?;
        let created_at = format_timestamp(now);

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO lookup_cache
                        (cache_key, entity_name, data_kind, payload, created_at, expires_at, source_urls, hit_count)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)
                    ON CONFLICT(cache_key) DO UPDATE SET
                        entity_name = excluded.entity_name,
                        data_kind = excluded.data_kind,
                        payload = excluded.payload,
                        created_at = excluded.created_at,
                        expires_at = excluded.expires_at,
                        source_urls = excluded.source_urls",
                    params![key, entity_name, data_kind, payload_json, created_at, expires_at, urls_json],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Get the stored row for a pair, expired or not, without counting a hit.
    pub async fn inspect_entry(&self, entity_name: &str, data_kind: &str) -> Result<Option<CacheEntry>, Error> {
        let key = compute_cache_key(entity_name, data_kind);
        self.conn
            .call(move |conn| -> Result<Option<CacheEntry>, Error> {
                let sql = format!("SELECT {ENTRY_COLUMNS} FROM lookup_cache WHERE cache_key = ?1");
                let result = conn.query_row(&sql, params![key], RawEntry::from_row);

                match result {
                    Ok(raw) => Ok(Some(CacheEntry::try_from(raw)?)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// List every stored row for an entity, ordered by data kind.
    ///
    /// Entity names are matched with SQLite's NOCASE collation (ASCII only).
    pub async fn entries_for_entity(&self, entity_name: &str) -> Result<Vec<CacheEntry>, Error> {
        let entity_name = entity_name.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<CacheEntry>, Error> {
                let sql = format!(
                    "SELECT {ENTRY_COLUMNS} FROM lookup_cache
                     WHERE entity_name = ?1 COLLATE NOCASE
                     ORDER BY data_kind"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![entity_name], RawEntry::from_row)?;

                let mut entries = Vec::new();
                for raw in rows {
                    entries.push(CacheEntry::try_from(raw?)?);
                }
                Ok(entries)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete entries that expired before `now`.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_expired_entries(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let now = format_timestamp(now);
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM lookup_cache WHERE expires_at < ?1", params![now])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
