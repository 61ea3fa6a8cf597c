use std::fmt::Display;
use std::time::Duration;

use crate::models::ProviderId;

/// Rejected request input. Raised before any downstream call is made.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Request text cannot be empty")]
    EmptyText,

    #[error("Requested count must be greater than zero")]
    ZeroCount,
}

/// Model output from which no valid recommendation could be recovered
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("No valid recommendations recovered ({discarded} blocks discarded)")]
    Empty { discarded: usize },
}

/// Why a single provider attempt failed
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderFailure {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited")]
    RateLimited,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("provider not configured")]
    NotConfigured,
}

impl ProviderFailure {
    /// Whether retrying the same provider could plausibly succeed
    pub fn is_transient(&self) -> bool {
        !matches!(self, ProviderFailure::NotConfigured)
    }
}

/// One failed attempt in a fallback chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub provider_id: ProviderId,
    pub failure: ProviderFailure,
}

impl Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.provider_id, self.failure)
    }
}

/// Fallback chain failures surfaced to the caller
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("All providers unavailable: {}", format_attempts(.attempts))]
    AllUnavailable { attempts: Vec<AttemptFailure> },

    #[error("Provider fallback chain is empty")]
    EmptyChain,
}

fn format_attempts(attempts: &[AttemptFailure]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Misconfigured or closed experiments
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ExperimentError {
    #[error("Unknown experiment: {0}")]
    UnknownExperiment(String),

    #[error("Unknown variant '{variant}' in experiment '{experiment}'")]
    UnknownVariant { experiment: String, variant: String },

    #[error("Experiment '{0}' is concluded")]
    Concluded(String),

    #[error("Experiment '{experiment}' variant weights sum to {sum}, expected 1.0")]
    InvalidWeights { experiment: String, sum: f64 },

    #[error("Experiment '{0}' has no variants")]
    NoVariants(String),

    #[error("Experiment '{experiment}' defines variant '{variant}' more than once")]
    DuplicateVariant { experiment: String, variant: String },

    #[error("Invalid outcome value: {0}")]
    InvalidOutcome(f64),
}

/// Cache malfunctions. Always degraded to a miss by the orchestrator.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache entry format version {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },
}

/// History lookup failures. Tolerated as an empty history.
#[derive(thiserror::Error, Debug)]
pub enum HistoryError {
    #[error("History store unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by `RecommendationEngine::recommend`
#[derive(thiserror::Error, Debug)]
pub enum RecommendationError {
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Experiment error: {0}")]
    Experiment(#[from] ExperimentError),

    #[error("Provider {provider_id} returned no usable recommendations ({parse_losses} blocks discarded)")]
    NoResults {
        provider_id: ProviderId,
        parse_losses: usize,
    },
}

pub type EngineResult<T> = Result<T, RecommendationError>;
