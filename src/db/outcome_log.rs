use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::models::{ExperimentId, OutcomeRecord};

/// Append-only store of experiment outcomes
///
/// Appends from concurrent callers must never be lost. Readers get a snapshot;
/// records appended after the snapshot was taken may or may not be included.
#[async_trait::async_trait]
pub trait OutcomeLog: Send + Sync {
    async fn append(&self, record: OutcomeRecord);

    /// Every record for the experiment, in append order
    async fn records(&self, experiment_id: &ExperimentId) -> Vec<OutcomeRecord>;
}

/// Process-local outcome log
#[derive(Default)]
pub struct InMemoryOutcomeLog {
    records: RwLock<HashMap<ExperimentId, Vec<OutcomeRecord>>>,
}

impl InMemoryOutcomeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl OutcomeLog for InMemoryOutcomeLog {
    async fn append(&self, record: OutcomeRecord) {
        self.records
            .write()
            .await
            .entry(record.experiment_id.clone())
            .or_default()
            .push(record);
    }

    async fn records(&self, experiment_id: &ExperimentId) -> Vec<OutcomeRecord> {
        self.records
            .read()
            .await
            .get(experiment_id)
            .cloned()
            .unwrap_or_default()
    }
}
