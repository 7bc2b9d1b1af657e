//! SQLite-backed store for school lookups and verification outcomes.
//!
//! This module provides a persistent cache using SQLite with async access via
//! tokio-rusqlite. It supports:
//!
//! - Entity fingerprints using SHA-256 hashing
//! - Automatic schema migrations
//! - WAL mode so several handles can share one file
//! - Expiry sweeps and health statistics
//!
//! Everything here returns `Result`; the best-effort behavior callers rely on
//! lives in [`crate::LookupCache`].

pub mod connection;
pub mod entries;
pub mod hash;
pub mod migrations;
pub mod stats;
pub mod verification;

mod timestamp;

pub use crate::Error;

pub use connection::CacheDb;
pub use entries::{CacheEntry, CachedLookup, MAX_TTL_HOURS, entry_expiry};
pub use stats::{CacheStats, StatsSummary};
pub use verification::{VERIFICATION_WINDOW_DAYS, VerificationEntry};
