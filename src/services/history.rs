use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::{error::HistoryError, models::HistoryEntry};

/// Read-only source of a user's past requests
///
/// Only used to enrich prompt context. Callers treat a failure the same as an
/// empty history.
#[async_trait::async_trait]
pub trait HistoryProvider: Send + Sync {
    async fn get_user_history(&self, user_id: &str) -> Result<Vec<HistoryEntry>, HistoryError>;
}

/// No history store configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHistory;

#[async_trait::async_trait]
impl HistoryProvider for NoHistory {
    async fn get_user_history(&self, _user_id: &str) -> Result<Vec<HistoryEntry>, HistoryError> {
        Ok(Vec::new())
    }
}

/// History held in process, keyed by user id
#[derive(Default)]
pub struct InMemoryHistory {
    entries: RwLock<HashMap<String, Vec<HistoryEntry>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, user_id: impl Into<String>, entry: HistoryEntry) {
        self.entries
            .write()
            .await
            .entry(user_id.into())
            .or_default()
            .push(entry);
    }
}

#[async_trait::async_trait]
impl HistoryProvider for InMemoryHistory {
    async fn get_user_history(&self, user_id: &str) -> Result<Vec<HistoryEntry>, HistoryError> {
        Ok(self
            .entries
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }
}
