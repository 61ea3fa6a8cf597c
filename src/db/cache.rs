use std::fmt::Display;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CacheError;
use crate::models::{ProviderId, RecommendationResult, VariantId};

/// Bumped whenever the fingerprint inputs or `CacheEntry` layout change.
/// Entries written under another version are never read back.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Content-addressed key for one (request, variant, provider, user context) combination
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// SHA-256 over the format version and every input, NUL-separated
    pub fn compute(text: &str, variant: &VariantId, provider: ProviderId, context: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("v{}", CACHE_FORMAT_VERSION).as_bytes());
        for part in [
            normalize_text(text).as_str(),
            variant.as_str(),
            provider.as_str(),
            context,
        ] {
            hasher.update([0u8]);
            hasher.update(part.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercases and collapses whitespace so trivially different phrasings share a key
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A stored result. Never patched: a write replaces the whole entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub format_version: u32,
    pub fingerprint: Fingerprint,
    pub result: RecommendationResult,
    pub created_at: DateTime<Utc>,
    pub ttl_ms: u64,
}

impl CacheEntry {
    pub fn new(fingerprint: Fingerprint, result: RecommendationResult, ttl: Duration) -> Self {
        Self {
            format_version: CACHE_FORMAT_VERSION,
            fingerprint,
            result,
            created_at: Utc::now(),
            ttl_ms: ttl.as_millis().min(u64::MAX as u128) as u64,
        }
    }

    /// `None` when the TTL reaches past the representable calendar range
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(Duration::from_millis(self.ttl_ms))
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires_at| now >= expires_at)
    }

    /// The stored result if the entry is current and still live
    pub fn into_live_result(
        self,
        now: DateTime<Utc>,
    ) -> Result<Option<RecommendationResult>, CacheError> {
        if self.format_version != CACHE_FORMAT_VERSION {
            return Err(CacheError::VersionMismatch {
                found: self.format_version,
                expected: CACHE_FORMAT_VERSION,
            });
        }
        if self.is_expired(now) {
            return Ok(None);
        }
        Ok(Some(self.result))
    }
}

/// Store of parsed results keyed by fingerprint
///
/// Implementations must tolerate concurrent readers and writers. Two callers
/// missing on the same key may both compute and write; last writer wins.
#[async_trait::async_trait]
pub trait ResponseCache: Send + Sync {
    /// Live entry for the fingerprint, `None` when absent or expired
    async fn get(&self, fingerprint: &Fingerprint)
        -> Result<Option<RecommendationResult>, CacheError>;

    /// Stores (replacing) the result for `ttl`
    async fn put(
        &self,
        fingerprint: &Fingerprint,
        result: &RecommendationResult,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn invalidate(&self, fingerprint: &Fingerprint) -> Result<(), CacheError>;

    /// Backend name for logging and debugging
    fn name(&self) -> &'static str;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Provenance, RecommendationItem};
    use uuid::Uuid;

    pub(crate) fn sample_result() -> RecommendationResult {
        RecommendationResult {
            items: vec![RecommendationItem {
                genre: "Synthwave".to_string(),
                artists: vec!["The Midnight".to_string()],
                album: "Endless Summer".to_string(),
                note: "Neon nostalgia".to_string(),
            }],
            provenance: Provenance {
                request_id: Uuid::new_v4(),
                provider_id: ProviderId::Local,
                variant_id: VariantId::new("zero_shot"),
                cache_hit: false,
                latency_ms: 120,
                shortfall: None,
                parse_losses: 0,
            },
        }
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let variant = VariantId::new("few_shot");
        let a = Fingerprint::compute("Rainy Sunday", &variant, ProviderId::Local, "");
        let b = Fingerprint::compute("Rainy Sunday", &variant, ProviderId::Local, "");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_normalizes_text() {
        let variant = VariantId::new("few_shot");
        let a = Fingerprint::compute("Rainy  Sunday\n", &variant, ProviderId::Local, "");
        let b = Fingerprint::compute("  rainy sunday", &variant, ProviderId::Local, "");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_differs_by_variant() {
        let a = Fingerprint::compute("focus", &VariantId::new("zero_shot"), ProviderId::Local, "");
        let b = Fingerprint::compute("focus", &VariantId::new("few_shot"), ProviderId::Local, "");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_differs_by_provider_and_context() {
        let variant = VariantId::new("zero_shot");
        let local = Fingerprint::compute("focus", &variant, ProviderId::Local, "");
        let cloud = Fingerprint::compute("focus", &variant, ProviderId::OpenAi, "");
        let with_context =
            Fingerprint::compute("focus", &variant, ProviderId::Local, "likes jazz");
        assert_ne!(local, cloud);
        assert_ne!(local, with_context);
    }

    #[test]
    fn test_fingerprint_inputs_do_not_run_together() {
        let a = Fingerprint::compute("ab", &VariantId::new("c"), ProviderId::Local, "");
        let b = Fingerprint::compute("a", &VariantId::new("bc"), ProviderId::Local, "");
        assert_ne!(a, b);
    }

    #[test]
    fn test_entry_expiry() {
        let fp = Fingerprint::compute("x", &VariantId::new("v"), ProviderId::Mock, "");
        let entry = CacheEntry::new(fp, sample_result(), Duration::from_secs(60));

        assert!(!entry.is_expired(entry.created_at));
        assert!(entry.is_expired(entry.created_at + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_entry_with_unbounded_ttl_never_expires() {
        let fp = Fingerprint::compute("x", &VariantId::new("v"), ProviderId::Mock, "");
        let entry = CacheEntry::new(fp, sample_result(), Duration::from_secs(u64::MAX));

        assert_eq!(entry.ttl_ms, u64::MAX);
        assert!(entry.expires_at().is_none());
        assert!(!entry.is_expired(Utc::now()));
        assert!(entry.into_live_result(Utc::now()).unwrap().is_some());
    }

    #[test]
    fn test_entry_version_mismatch() {
        let fp = Fingerprint::compute("x", &VariantId::new("v"), ProviderId::Mock, "");
        let mut entry = CacheEntry::new(fp, sample_result(), Duration::from_secs(60));
        entry.format_version = CACHE_FORMAT_VERSION + 1;

        let err = entry.into_live_result(Utc::now()).unwrap_err();
        assert!(matches!(err, CacheError::VersionMismatch { .. }));
    }
}
