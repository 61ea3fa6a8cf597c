use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RecommendationItem;

/// A past request and what was recommended for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub mood: String,
    pub timestamp: DateTime<Utc>,
    pub items: Vec<RecommendationItem>,
}

impl HistoryEntry {
    pub fn new(mood: impl Into<String>, items: Vec<RecommendationItem>) -> Self {
        Self {
            mood: mood.into(),
            timestamp: Utc::now(),
            items,
        }
    }
}
