//! In-memory [`super::SnapshotStore`]/[`super::HistoryStore`] implementations.
//!
//! Ambient test/demo infrastructure only — concrete production backends
//! (a relational shard, a local file store) are external collaborators per
//! the crate's scope. These doubles back this crate's own test suite and
//! the `demos/` harness.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{HistoryStore, Page, SnapshotRow, SnapshotStore, StoreResult};

/// A `DashMap`-backed active store: one row per machine id.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    rows: DashMap<String, SnapshotRow>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently held, for test assertions.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn upsert(&self, row: SnapshotRow) -> StoreResult<()> {
        self.rows.insert(row.machine_id.clone(), row);
        Ok(())
    }

    async fn find_latest(&self, machine_id: &str) -> StoreResult<Option<SnapshotRow>> {
        Ok(self.rows.get(machine_id).map(|r| r.clone()))
    }

    async fn mark_offline(&self, machine_id: &str, offline: bool) -> StoreResult<()> {
        if let Some(mut row) = self.rows.get_mut(machine_id) {
            row.is_offline = offline;
        }
        Ok(())
    }

    async fn delete(&self, machine_id: &str) -> StoreResult<()> {
        self.rows.remove(machine_id);
        Ok(())
    }

    async fn scan_where_state_in(
        &self,
        final_states: &[String],
        _page_cursor: Option<String>,
    ) -> StoreResult<Page> {
        let rows: Vec<SnapshotRow> = self
            .rows
            .iter()
            .filter(|entry| final_states.iter().any(|s| s == &entry.state))
            .map(|entry| entry.clone())
            .collect();
        Ok(Page {
            rows,
            next_cursor: None,
        })
    }
}

/// A `DashMap`-backed history store: one row per terminated machine.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    rows: DashMap<String, SnapshotRow>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, machine_id: &str) -> bool {
        self.rows.contains_key(machine_id)
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn insert(&self, row: SnapshotRow) -> StoreResult<()> {
        self.rows.entry(row.machine_id.clone()).or_insert(row);
        Ok(())
    }

    async fn find_latest(&self, machine_id: &str) -> StoreResult<Option<SnapshotRow>> {
        Ok(self.rows.get(machine_id).map(|r| r.clone()))
    }

    async fn delete_older_than(&self, cutoff: chrono::DateTime<Utc>) -> StoreResult<u64> {
        let stale: Vec<String> = self
            .rows
            .iter()
            .filter(|entry| entry.timestamp < cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        let removed = stale.len() as u64;
        for key in stale {
            self.rows.remove(&key);
        }
        Ok(removed)
    }
}
