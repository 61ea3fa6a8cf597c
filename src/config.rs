use serde::Deserialize;

use crate::models::ProviderId;

/// Engine configuration
///
/// The engine receives this value at construction and never reads the
/// environment itself. `from_env` is provided for binaries.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Config {
    /// Fallback chain used when a variant does not set its own
    #[serde(default = "default_provider_order")]
    pub provider_order: Vec<ProviderId>,

    /// Per-attempt provider timeout
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    /// Extra attempts on the same provider before falling back
    #[serde(default)]
    pub provider_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Upper bound on in-memory cache entries
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// Shared cache location; in-process cache when unset
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Experiment every request is assigned through
    #[serde(default = "default_experiment_id")]
    pub experiment_id: String,

    /// Per-variant samples required before significance is computed
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: usize,

    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,

    /// Recommendations per request when the caller does not say
    #[serde(default = "default_count")]
    pub default_count: usize,
}

fn default_provider_order() -> Vec<ProviderId> {
    vec![ProviderId::Local, ProviderId::OpenAi]
}

fn default_provider_timeout_secs() -> u64 {
    30
}

fn default_retry_delay_ms() -> u64 {
    250
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_cache_max_entries() -> usize {
    1000
}

fn default_experiment_id() -> String {
    "prompt_optimization".to_string()
}

fn default_min_sample_size() -> usize {
    100
}

fn default_confidence_level() -> f64 {
    0.95
}

fn default_count() -> usize {
    4
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider_order: default_provider_order(),
            provider_timeout_secs: default_provider_timeout_secs(),
            provider_retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
            cache_enabled: true,
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
            redis_url: None,
            experiment_id: default_experiment_id(),
            min_sample_size: default_min_sample_size(),
            confidence_level: default_confidence_level(),
            default_count: default_count(),
        }
    }
}

impl Config {
    /// Load configuration from `SYNTHSCRIBE_*` environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::prefixed("SYNTHSCRIBE_")
            .from_env::<Config>()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }
}
