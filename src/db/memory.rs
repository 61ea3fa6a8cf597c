use std::time::{Duration, Instant};

use chrono::Utc;
use moka::future::Cache;
use moka::Expiry;

use crate::db::cache::{CacheEntry, Fingerprint, ResponseCache};
use crate::error::CacheError;
use crate::models::RecommendationResult;

/// Capacity used by `InMemoryCache::new`
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// TTLs at or beyond this are treated as "never expires"
const MAX_EXPIRY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Expires each entry after the TTL it was written with
struct EntryExpiry;

impl Expiry<Fingerprint, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &Fingerprint,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        let ttl = Duration::from_millis(value.ttl_ms);
        (ttl < MAX_EXPIRY).then_some(ttl)
    }

    fn expire_after_update(
        &self,
        key: &Fingerprint,
        value: &CacheEntry,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        self.expire_after_create(key, value, updated_at)
    }
}

/// In-process response cache backed by `moka`
///
/// Entries expire after their own TTL and the cache holds at most
/// `max_entries`, evicting by moka's TinyLFU policy once full.
pub struct InMemoryCache {
    cache: Cache<Fingerprint, CacheEntry>,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn bounded(max_entries: usize) -> Self {
        Self::with_capacity(max_entries.max(1) as u64)
    }

    fn with_capacity(max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(EntryExpiry)
            .build();
        Self { cache }
    }

    /// Live entry count once pending evictions have been applied
    pub async fn len(&self) -> usize {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count() as usize
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Applies pending expirations and evictions now instead of on later access
    pub async fn purge_expired(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait::async_trait]
impl ResponseCache for InMemoryCache {
    async fn get(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<RecommendationResult>, CacheError> {
        match self.cache.get(fingerprint).await {
            Some(entry) => entry.into_live_result(Utc::now()),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        fingerprint: &Fingerprint,
        result: &RecommendationResult,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry::new(fingerprint.clone(), result.clone(), ttl);
        self.cache.insert(fingerprint.clone(), entry).await;
        Ok(())
    }

    async fn invalidate(&self, fingerprint: &Fingerprint) -> Result<(), CacheError> {
        self.cache.invalidate(fingerprint).await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
