//! Best-effort cache used around expensive school lookups.
//!
//! [`LookupCache`] wraps [`CacheDb`] so that nothing it does can fail the
//! caller: storage faults, bad inputs and undecodable rows are logged and turn
//! into misses (reads) or no-ops (writes). A disabled cache performs no I/O.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{CacheDb, CacheEntry, CacheStats, CachedLookup, VerificationEntry, entry_expiry};
use crate::{AppConfig, Error};

#[derive(Clone, Debug)]
enum Backend {
    Disabled,
    Ready(CacheDb),
    /// The store could not be opened; behaves as a permanently cold cache.
    Unavailable(Arc<str>),
}

/// Result of an external lookup, ready to be cached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fetched {
    pub data: Value,
    #[serde(default)]
    pub source_urls: Vec<String>,
    /// Overrides the configured TTL for this entry.
    #[serde(default)]
    pub ttl_hours: Option<i64>,
}

impl Fetched {
    pub fn new(data: Value) -> Self {
        Self { data, ..Default::default() }
    }

    pub fn with_sources(mut self, source_urls: Vec<String>) -> Self {
        self.source_urls = source_urls;
        self
    }
}

/// Rows removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub entries_removed: u64,
    pub verifications_removed: u64,
}

/// Lookup cache handle, constructed once per process.
#[derive(Clone, Debug)]
pub struct LookupCache {
    backend: Backend,
    default_ttl: Duration,
}

fn report(operation: &'static str, subject: &str, kind: &str, err: &Error) {
    match err {
        Error::InvalidInput(_) => {
            tracing::warn!(operation, subject, kind, error = %err, "cache call rejected")
        }
        _ => tracing::error!(operation, subject, kind, error = %err, "cache operation failed"),
    }
}

impl LookupCache {
    /// Open the cache described by `config`.
    ///
    /// Never fails: if the store cannot be opened the handle still works and
    /// every lookup misses, with the cause reported through [`Self::get_stats`].
    pub async fn open(config: &AppConfig) -> Self {
        let default_ttl = config.default_ttl();
        if !config.enable_cache {
            tracing::info!("lookup cache disabled by configuration");
            return Self { backend: Backend::Disabled, default_ttl };
        }

        let path = config.cache_path();
        match CacheDb::open(&path).await {
            Ok(db) => {
                tracing::debug!(path = %path.display(), "lookup cache ready");
                Self { backend: Backend::Ready(db), default_ttl }
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "lookup cache unavailable, continuing without it");
                Self { backend: Backend::Unavailable(e.to_string().into()), default_ttl }
            }
        }
    }

    /// A handle that never stores anything.
    pub fn disabled() -> Self {
        Self { backend: Backend::Disabled, default_ttl: AppConfig::default().default_ttl() }
    }

    /// Wrap an already opened database.
    pub fn with_db(db: CacheDb, default_ttl: Duration) -> Self {
        Self { backend: Backend::Ready(db), default_ttl }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.backend, Backend::Disabled)
    }

    fn ttl_for(&self, ttl_hours: Option<i64>) -> Result<Duration, Error> {
        match ttl_hours {
            None => Ok(self.default_ttl),
            Some(hours) => Duration::try_hours(hours)
                .ok_or_else(|| Error::InvalidInput(format!("ttl_hours out of range: {hours}"))),
        }
    }

    fn db(&self) -> Option<&CacheDb> {
        match &self.backend {
            Backend::Ready(db) => Some(db),
            Backend::Disabled | Backend::Unavailable(_) => None,
        }
    }

    /// Look up a live entry, counting the hit.
    pub async fn get(&self, entity_name: &str, data_kind: &str) -> Option<CachedLookup> {
        self.get_at(entity_name, data_kind, Utc::now()).await
    }

    /// [`Self::get`] evaluated at `now`.
    pub async fn get_at(&self, entity_name: &str, data_kind: &str, now: DateTime<Utc>) -> Option<CachedLookup> {
        let db = self.db()?;
        match db.get_entry(entity_name, data_kind, now).await {
            Ok(Some(hit)) => {
                tracing::debug!(entity = entity_name, kind = data_kind, hits = hit.hit_count, "cache hit");
                Some(hit)
            }
            Ok(None) => {
                tracing::debug!(entity = entity_name, kind = data_kind, "cache miss");
                None
            }
            Err(e) => {
                report("get", entity_name, data_kind, &e);
                None
            }
        }
    }

    /// Store a lookup result. `ttl_hours` defaults to the configured TTL and
    /// must lie between 1 hour and one year; anything else is logged and dropped.
    pub async fn set(
        &self, entity_name: &str, data_kind: &str, payload: &Value, source_urls: &[String], ttl_hours: Option<i64>,
    ) {
        self.set_at(entity_name, data_kind, payload, source_urls, ttl_hours, Utc::now())
            .await
    }

    /// [`Self::set`] with the entry created at `now`.
    pub async fn set_at(
        &self, entity_name: &str, data_kind: &str, payload: &Value, source_urls: &[String], ttl_hours: Option<i64>,
        now: DateTime<Utc>,
    ) {
        let Some(db) = self.db() else {
            return;
        };
        let ttl = match self.ttl_for(ttl_hours) {
            Ok(ttl) => ttl,
            Err(e) => return report("set", entity_name, data_kind, &e),
        };
        match db.put_entry(entity_name, data_kind, payload, source_urls, ttl, now).await {
            Ok(()) => tracing::debug!(entity = entity_name, kind = data_kind, ttl_hours = ttl.num_hours(), "cached"),
            Err(e) => report("set", entity_name, data_kind, &e),
        }
    }

    /// Every stored row for an entity, expired or not. Does not count hits.
    pub async fn entries_for(&self, entity_name: &str) -> Vec<CacheEntry> {
        let Some(db) = self.db() else {
            return Vec::new();
        };
        db.entries_for_entity(entity_name).await.unwrap_or_else(|e| {
            report("entries_for", entity_name, "*", &e);
            Vec::new()
        })
    }

    /// Look up a verification outcome recorded within the last seven days.
    pub async fn get_verification(&self, identifier: &str, identifier_type: &str) -> Option<VerificationEntry> {
        self.get_verification_at(identifier, identifier_type, Utc::now()).await
    }

    /// [`Self::get_verification`] evaluated at `now`.
    pub async fn get_verification_at(
        &self, identifier: &str, identifier_type: &str, now: DateTime<Utc>,
    ) -> Option<VerificationEntry> {
        let db = self.db()?;
        match db.get_verification(identifier, identifier_type, now).await {
            Ok(entry) => entry,
            Err(e) => {
                report("get_verification", identifier, identifier_type, &e);
                None
            }
        }
    }

    /// Record a verification outcome, replacing the previous one.
    pub async fn set_verification(
        &self, identifier: &str, identifier_type: &str, is_valid: bool, confidence_score: f64, details: Option<&Value>,
    ) {
        self.set_verification_at(identifier, identifier_type, is_valid, confidence_score, details, Utc::now())
            .await
    }

    /// [`Self::set_verification`] with `verified_at = now`.
    pub async fn set_verification_at(
        &self, identifier: &str, identifier_type: &str, is_valid: bool, confidence_score: f64, details: Option<&Value>,
        now: DateTime<Utc>,
    ) {
        let Some(db) = self.db() else {
            return;
        };
        if let Err(e) = db
            .put_verification(identifier, identifier_type, is_valid, confidence_score, details, now)
            .await
        {
            report("set_verification", identifier, identifier_type, &e);
        }
    }

    /// Delete expired entries and stale verifications, then compact the file.
    pub async fn clear_expired(&self) -> SweepReport {
        self.clear_expired_at(Utc::now()).await
    }

    /// [`Self::clear_expired`] with both predicates evaluated at `now`.
    pub async fn clear_expired_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut sweep = SweepReport::default();
        let Some(db) = self.db() else {
            return sweep;
        };

        match db.purge_expired_entries(now).await {
            Ok(count) => sweep.entries_removed = count,
            Err(e) => report("clear_expired", "lookup_cache", "*", &e),
        }
        match db.purge_stale_verifications(now).await {
            Ok(count) => sweep.verifications_removed = count,
            Err(e) => report("clear_expired", "verification_cache", "*", &e),
        }
        if let Err(e) = db.compact().await {
            report("compact", "lookup_cache", "*", &e);
        }

        tracing::info!(
            entries = sweep.entries_removed,
            verifications = sweep.verifications_removed,
            "cache sweep finished"
        );
        sweep
    }

    /// Report cache health.
    pub async fn get_stats(&self) -> CacheStats {
        self.get_stats_at(Utc::now()).await
    }

    /// [`Self::get_stats`] with active/expired split at `now`.
    pub async fn get_stats_at(&self, now: DateTime<Utc>) -> CacheStats {
        match &self.backend {
            Backend::Disabled => CacheStats::disabled(),
            Backend::Unavailable(reason) => CacheStats::failed(reason.to_string()),
            Backend::Ready(db) => match db.collect_stats(now).await {
                Ok(summary) => CacheStats::collected(summary),
                Err(e) => {
                    tracing::error!(error = %e, "cache stats failed");
                    CacheStats::failed(e.to_string())
                }
            },
        }
    }

    /// Serve `(entity_name, data_kind)` from the cache, or run `fetch` and
    /// cache its result.
    ///
    /// With `force_refresh` the cache is not read but the fresh result still
    /// overwrites the entry. Errors from `fetch` are returned untouched and
    /// nothing is stored for them.
    pub async fn cached_lookup<F, Fut, E>(
        &self, entity_name: &str, data_kind: &str, force_refresh: bool, fetch: F,
    ) -> Result<CachedLookup, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Fetched, E>>,
    {
        if !force_refresh && let Some(hit) = self.get(entity_name, data_kind).await {
            return Ok(hit);
        }

        let fetched = fetch().await?;
        let now = Utc::now();
        self.set_at(entity_name, data_kind, &fetched.data, &fetched.source_urls, fetched.ttl_hours, now)
            .await;

        // A lifetime the store refuses leaves nothing cached, so the result is already stale.
        let expires_at = self
            .ttl_for(fetched.ttl_hours)
            .and_then(|ttl| entry_expiry(now, ttl))
            .unwrap_or(now);
        Ok(CachedLookup {
            data: fetched.data,
            source_urls: fetched.source_urls,
            cached: false,
            expires_at,
            hit_count: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn memory_cache() -> LookupCache {
        let db = CacheDb::open_in_memory().await.unwrap();
        LookupCache::with_db(db, Duration::hours(24))
    }

    fn file_config(dir: &std::path::Path) -> AppConfig {
        AppConfig { cache_dir: dir.join("cache"), ..Default::default() }
    }

    #[tokio::test]
    async fn test_ofsted_scenario() {
        let cache = memory_cache().await;
        let now = Utc::now();

        cache
            .set_at("Elm Primary", "ofsted", &json!({"rating": "Good"}), &[], Some(1), now)
            .await;

        let hit = cache.get_at("Elm Primary", "ofsted", now).await.unwrap();
        let value = serde_json::to_value(&hit).unwrap();
        assert_eq!(value["data"], json!({"rating": "Good"}));
        assert_eq!(value["cached"], json!(true));

        let later = now + Duration::hours(2);
        assert!(cache.get_at("Elm Primary", "ofsted", later).await.is_none());
    }

    #[tokio::test]
    async fn test_phone_verification_scenario() {
        let cache = memory_cache().await;

        cache.set_verification("07123456789", "phone", true, 0.92, None).await;

        let entry = cache.get_verification("07123456789", "phone").await.unwrap();
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["is_valid"], json!(true));
        assert_eq!(value["confidence_score"], json!(0.92));
        assert_eq!(value["cached"], json!(true));
    }

    #[tokio::test]
    async fn test_hit_count_sequence() {
        let cache = memory_cache().await;

        cache.set("Oak School", "financial", &json!({"v": 1}), &[], None).await;
        assert_eq!(cache.get("Oak School", "financial").await.unwrap().hit_count, 1);

        cache.set("Oak School", "financial", &json!({"v": 2}), &[], None).await;
        assert_eq!(cache.get("oak school", "financial").await.unwrap().hit_count, 2);
    }

    #[tokio::test]
    async fn test_default_ttl_applied() {
        let cache = memory_cache().await;
        let now = Utc::now();

        cache.set_at("Oak School", "contacts", &json!([]), &[], None, now).await;

        assert!(cache.get_at("Oak School", "contacts", now + Duration::hours(23)).await.is_some());
        assert!(cache.get_at("Oak School", "contacts", now + Duration::hours(25)).await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_inputs_are_misses() {
        let cache = memory_cache().await;

        cache.set("", "ofsted", &json!({}), &[], None).await;
        cache.set("Elm Primary", "ofsted", &json!({}), &[], Some(-3)).await;
        cache.set_verification("07123456789", "phone", true, 7.0, None).await;

        assert!(cache.get("", "ofsted").await.is_none());
        assert!(cache.get("Elm Primary", "ofsted").await.is_none());
        assert!(cache.get_verification("07123456789", "phone").await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig { enable_cache: false, ..file_config(dir.path()) };
        let cache = LookupCache::open(&config).await;

        cache.set("Elm Primary", "ofsted", &json!({"rating": "Good"}), &[], None).await;
        cache.set_verification("07123456789", "phone", true, 0.92, None).await;

        assert!(!cache.is_enabled());
        assert!(cache.get("Elm Primary", "ofsted").await.is_none());
        assert!(cache.get_verification("07123456789", "phone").await.is_none());
        assert_eq!(cache.clear_expired().await, SweepReport::default());
        assert_eq!(cache.get_stats().await, CacheStats::disabled());
        assert!(!config.cache_dir.exists());
    }

    #[tokio::test]
    async fn test_open_creates_store_on_first_use() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(dir.path());

        let cache = LookupCache::open(&config).await;
        assert!(cache.is_enabled());
        assert!(config.cache_path().exists());

        let stats = cache.get_stats().await;
        assert!(stats.enabled);
        assert!(stats.error.is_none());
        assert_eq!(stats.summary.unwrap().total_entries, 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_degrades_to_misses() {
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let config = AppConfig { cache_dir: blocker.path().join("cache"), ..Default::default() };

        let cache = LookupCache::open(&config).await;
        cache.set("Elm Primary", "ofsted", &json!({}), &[], None).await;

        assert!(cache.get("Elm Primary", "ofsted").await.is_none());
        let stats = cache.get_stats().await;
        assert!(stats.enabled);
        assert!(stats.error.is_some());
        assert!(stats.summary.is_none());
    }

    #[tokio::test]
    async fn test_handles_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(dir.path());
        let writer = LookupCache::open(&config).await;
        let reader = LookupCache::open(&config).await;

        writer
            .set("Birch College", "competitors", &json!(["Agency X"]), &[], None)
            .await;

        let first = reader.get("Birch College", "competitors").await.unwrap();
        assert_eq!(first.data, json!(["Agency X"]));
        let second = writer.get("Birch College", "competitors").await.unwrap();
        assert_eq!(second.hit_count, first.hit_count + 1);
    }

    #[tokio::test]
    async fn test_clear_expired_removes_exactly_stale_rows() {
        let cache = memory_cache().await;
        let now = Utc::now();

        cache.set_at("Elm Primary", "ofsted", &json!({}), &[], Some(1), now).await;
        cache.set_at("Oak School", "ofsted", &json!({}), &[], Some(48), now).await;
        cache.set_at("Ash Academy", "ofsted", &json!({}), &[], Some(3), now).await;
        cache
            .set_verification_at("old@ash.sch.uk", "email", true, 0.8, None, now - Duration::days(8))
            .await;
        cache
            .set_verification_at("07123456789", "phone", true, 0.9, None, now)
            .await;

        let sweep_at = now + Duration::hours(2);
        let before = cache.get_stats_at(sweep_at).await.summary.unwrap();
        assert_eq!(before.total_entries, 3);
        assert_eq!(before.verification_entries, 2);

        let sweep = cache.clear_expired_at(sweep_at).await;
        assert_eq!(sweep, SweepReport { entries_removed: 1, verifications_removed: 1 });

        let after = cache.get_stats_at(sweep_at).await.summary.unwrap();
        assert_eq!(after.total_entries, 2);
        assert_eq!(after.expired_entries, 0);
        assert_eq!(after.verification_entries, 1);

        assert_eq!(cache.clear_expired_at(sweep_at).await, SweepReport::default());
    }

    #[tokio::test]
    async fn test_clear_expired_compacts_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LookupCache::open(&file_config(dir.path())).await;
        let now = Utc::now();
        let report = json!({"inspection": "x".repeat(8 * 1024)});

        for i in 0..200 {
            cache
                .set_at(&format!("School {i}"), "ofsted", &report, &[], Some(1), now)
                .await;
        }
        cache.set_at("Oak School", "ofsted", &json!({}), &[], Some(48), now).await;

        let sweep_at = now + Duration::hours(2);
        let before = cache.get_stats_at(sweep_at).await.summary.unwrap();
        assert_eq!(before.expired_entries, 200);

        let sweep = cache.clear_expired_at(sweep_at).await;
        assert_eq!(sweep.entries_removed, 200);

        let after = cache.get_stats_at(sweep_at).await.summary.unwrap();
        assert_eq!(after.total_entries, 1);
        assert!(
            after.cache_size_bytes < before.cache_size_bytes / 4,
            "{} bytes before, {} after",
            before.cache_size_bytes,
            after.cache_size_bytes
        );
    }

    #[tokio::test]
    async fn test_ttl_beyond_a_year_is_not_stored() {
        let cache = memory_cache().await;
        let now = Utc::now();

        cache
            .set_at("Elm Primary", "ofsted", &json!({"rating": "Good"}), &[], Some(70_000_000), now)
            .await;
        cache
            .set("Oak School", "ofsted", &json!({"rating": "Good"}), &[], Some(i64::MAX))
            .await;

        assert!(cache.get_at("Elm Primary", "ofsted", now).await.is_none());
        assert!(cache.entries_for("Elm Primary").await.is_empty());
        assert!(cache.entries_for("Oak School").await.is_empty());
        assert_eq!(cache.get_stats_at(now).await.summary.unwrap().total_entries, 0);

        cache
            .set_at("Elm Primary", "ofsted", &json!({"rating": "Good"}), &[], Some(24 * 365), now)
            .await;
        let hit = cache.get_at("Elm Primary", "ofsted", now).await.unwrap();
        assert!(hit.expires_at > now + Duration::hours(24 * 364));
    }

    #[tokio::test]
    async fn test_cached_lookup_with_unusable_ttl() {
        let cache = memory_cache().await;

        for ttl_hours in [i64::MAX, 70_000_000] {
            let fresh = cache
                .cached_lookup("Elm Primary", "financial", false, move || async move {
                    Ok::<_, String>(Fetched {
                        data: json!({"reserves": 120_000}),
                        ttl_hours: Some(ttl_hours),
                        ..Default::default()
                    })
                })
                .await
                .unwrap();
            assert!(!fresh.cached);
            assert_eq!(fresh.data, json!({"reserves": 120_000}));
            assert!(fresh.expires_at <= Utc::now());
        }
        assert!(cache.get("Elm Primary", "financial").await.is_none());
    }

    #[tokio::test]
    async fn test_cached_lookup_skips_fetch_on_hit() {
        let cache = memory_cache().await;
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let first = cache
            .cached_lookup("Elm Primary", "contacts", false, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let fetched = Fetched::new(json!({"head": "J. Smith"})).with_sources(vec!["https://elm.sch.uk".into()]);
                Ok::<_, String>(fetched)
            })
            .await
            .unwrap();
        assert!(!first.cached);
        assert_eq!(first.hit_count, 0);

        let second = cache
            .cached_lookup("Elm Primary", "contacts", false, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(Fetched::new(json!({})))
            })
            .await
            .unwrap();
        assert!(second.cached);
        assert_eq!(second.data, json!({"head": "J. Smith"}));
        assert_eq!(second.source_urls, vec!["https://elm.sch.uk".to_string()]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_lookup_force_refresh() {
        let cache = memory_cache().await;
        cache.set("Elm Primary", "ofsted", &json!({"rating": "Good"}), &[], None).await;

        let refreshed = cache
            .cached_lookup("Elm Primary", "ofsted", true, || async {
                Ok::<_, String>(Fetched::new(json!({"rating": "Outstanding"})))
            })
            .await
            .unwrap();
        assert!(!refreshed.cached);

        let hit = cache.get("Elm Primary", "ofsted").await.unwrap();
        assert_eq!(hit.data, json!({"rating": "Outstanding"}));
    }

    #[tokio::test]
    async fn test_cached_lookup_fetch_error_not_cached() {
        let cache = memory_cache().await;

        let result = cache
            .cached_lookup("Elm Primary", "financial", false, || async {
                Err::<Fetched, _>("search quota exhausted".to_string())
            })
            .await;
        assert_eq!(result.unwrap_err(), "search quota exhausted");
        assert!(cache.get("Elm Primary", "financial").await.is_none());
    }

    #[tokio::test]
    async fn test_cached_lookup_on_disabled_cache_always_fetches() {
        let cache = LookupCache::disabled();
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        for _ in 0..2 {
            cache
                .cached_lookup("Elm Primary", "ofsted", false, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(Fetched::new(json!({})))
                })
                .await
                .unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
