//! In-memory store of live migration records.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::record::MigrationRecord;

/// Concurrent map from migration id to record.
#[derive(Default)]
pub struct MigrationStore {
    records: DashMap<String, Arc<MigrationRecord>>,
}

impl MigrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: Arc<MigrationRecord>) {
        self.records.insert(record.id().to_string(), record);
    }

    pub fn get(&self, id: &str) -> Option<Arc<MigrationRecord>> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    /// Remove a record if it has reached a terminal state.
    ///
    /// `Err` carries the record back when it is still live.
    pub fn remove_terminal(&self, id: &str) -> Option<Result<Arc<MigrationRecord>, Arc<MigrationRecord>>> {
        if let Some((_, record)) = self.records.remove_if(id, |_, record| record.is_terminal()) {
            return Some(Ok(record));
        }
        self.get(id).map(Err)
    }

    /// All records, oldest first.
    pub fn list(&self) -> Vec<Arc<MigrationRecord>> {
        let mut records: Vec<(DateTime<Utc>, Arc<MigrationRecord>)> = self
            .records
            .iter()
            .map(|entry| (entry.value().snapshot().created_at, entry.value().clone()))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id().cmp(b.1.id())));
        records.into_iter().map(|(_, record)| record).collect()
    }

    /// Drop terminal records that completed before `cutoff`. Returns how
    /// many were dropped.
    pub fn remove_completed_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| {
            let snapshot = record.snapshot();
            !(snapshot.is_terminal() && snapshot.completed_at.is_some_and(|at| at < cutoff))
        });
        before.saturating_sub(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;
    use crate::request::MigrationRequest;
    use crate::state::MigrationStatus;

    fn record(id: &str) -> Arc<MigrationRecord> {
        Arc::new(MigrationRecord::with_id(
            id,
            MigrationRequest::single("redis", MigrationConfig::new()),
            8,
        ))
    }

    #[test]
    fn test_remove_terminal_only() {
        let store = MigrationStore::new();
        let live = record("live");
        let done = record("done");
        done.finish(MigrationStatus::Completed, None);
        store.insert(live);
        store.insert(done);

        assert!(matches!(store.remove_terminal("live"), Some(Err(_))));
        assert!(matches!(store.remove_terminal("done"), Some(Ok(_))));
        assert!(store.remove_terminal("done").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_completed_before_cutoff() {
        let store = MigrationStore::new();
        let done = record("done");
        done.finish(MigrationStatus::Cancelled, None);
        store.insert(done);
        store.insert(record("pending"));

        assert_eq!(store.remove_completed_before(Utc::now() - chrono::Duration::hours(1)), 0);
        assert_eq!(store.remove_completed_before(Utc::now() + chrono::Duration::seconds(1)), 1);
        assert!(store.get("pending").is_some());
        assert!(store.get("done").is_none());
    }
}
