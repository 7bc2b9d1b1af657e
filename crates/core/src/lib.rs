//! Core of the school intelligence lookup cache.
//!
//! This crate provides:
//! - Cache implementation with SQLite backend
//! - The best-effort [`LookupCache`] used around external lookups
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod lookup;

pub use cache::{CacheDb, CacheEntry, CacheStats, CachedLookup, StatsSummary, VerificationEntry};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use lookup::{Fetched, LookupCache, SweepReport};
