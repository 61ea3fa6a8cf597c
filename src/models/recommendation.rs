use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ProviderId, VariantId};
use crate::error::ValidationError;

/// Number of recommendations returned when the caller does not ask for a specific count
pub const DEFAULT_REQUESTED_COUNT: usize = 4;

/// A caller's request for recommendations. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRequest {
    raw_text: String,
    user_id: Option<String>,
    requested_count: usize,
    timestamp: DateTime<Utc>,
}

impl RecommendationRequest {
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            user_id: None,
            requested_count: DEFAULT_REQUESTED_COUNT,
            timestamp: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_count(mut self, requested_count: usize) -> Self {
        self.requested_count = requested_count;
        self
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn requested_count(&self) -> usize {
        self.requested_count
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Checks the request can be served at all
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.raw_text.trim().is_empty() {
            return Err(ValidationError::EmptyText);
        }
        if self.requested_count == 0 {
            return Err(ValidationError::ZeroCount);
        }
        Ok(())
    }
}

/// A single validated recommendation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub genre: String,
    pub artists: Vec<String>,
    pub album: String,
    /// Why this fits the request
    pub note: String,
}

impl RecommendationItem {
    /// True when every field carries non-blank content
    pub fn is_valid(&self) -> bool {
        !self.genre.trim().is_empty()
            && !self.album.trim().is_empty()
            && !self.note.trim().is_empty()
            && !self.artists.is_empty()
            && self.artists.iter().all(|a| !a.trim().is_empty())
    }
}

/// Delivered fewer items than requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub requested: usize,
    pub delivered: usize,
}

/// Where a result came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub request_id: Uuid,
    pub provider_id: ProviderId,
    pub variant_id: VariantId,
    pub cache_hit: bool,
    pub latency_ms: u64,
    pub shortfall: Option<Shortfall>,
    /// Model output blocks dropped during parsing
    pub parse_losses: usize,
}

/// Recommendations plus provenance, returned by value to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationResult {
    pub items: Vec<RecommendationItem>,
    pub provenance: Provenance,
}

impl RecommendationResult {
    pub fn is_shortfall(&self) -> bool {
        self.provenance.shortfall.is_some()
    }
}
