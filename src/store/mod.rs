// Copyright (c) 2025 - Cowboy AI, Inc.
//! Snapshot and history storage abstractions
//!
//! Concrete backends (relational shards, local filesystem) are external
//! collaborators: this module only defines the trait shape a backend must
//! implement, grounded on [`crate`]'s sibling `EventStore` pattern — an
//! `async_trait` interface returning a crate-local result type, kept
//! `Send + Sync` so it can be shared behind an `Arc` across the registry's
//! write path, the archival workers, and the retention sweeper.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::{MemoryHistoryStore, MemorySnapshotStore};

/// Errors surfaced by a [`SnapshotStore`] or [`HistoryStore`] implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached; retryable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A row's `context_data` could not be decoded.
    #[error("corrupt snapshot for {machine_id}: {reason}")]
    CorruptSnapshot { machine_id: String, reason: String },
    /// Generic backend failure, not otherwise classified.
    #[error("store error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Canonical persisted unit: the latest (or, in history, final) known state
/// of one machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    /// Opaque id, unique per registry. At most 255 characters.
    pub machine_id: String,
    /// Must match a state name in the machine's current definition.
    pub state: String,
    /// Opaque to the engine; definition-specific.
    pub context_data: serde_json::Value,
    /// Set on every write.
    pub timestamp: DateTime<Utc>,
    /// Active store only; `true` iff the machine is not currently live.
    pub is_offline: bool,
}

impl SnapshotRow {
    pub fn new(machine_id: impl Into<String>, state: impl Into<String>, context_data: serde_json::Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            machine_id: machine_id.into(),
            state: state.into(),
            context_data,
            timestamp,
            is_offline: false,
        }
    }
}

/// A page of [`SnapshotRow`]s plus a cursor to continue a scan.
#[derive(Debug, Clone)]
pub struct Page {
    pub rows: Vec<SnapshotRow>,
    pub next_cursor: Option<String>,
}

/// Durable key -> latest-snapshot map for active machines.
///
/// Implementations must make `upsert` an atomic replace-by-`machine_id`:
/// concurrent writers for the same id never interleave partial rows, and a
/// reader never observes a torn write.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Atomic replace-by-`machine_id`.
    async fn upsert(&self, row: SnapshotRow) -> StoreResult<()>;

    /// The most recently written row for `machine_id`, if any.
    async fn find_latest(&self, machine_id: &str) -> StoreResult<Option<SnapshotRow>>;

    /// Flip the `is_offline` flag in place without touching state/context.
    async fn mark_offline(&self, machine_id: &str, offline: bool) -> StoreResult<()>;

    /// Remove the row outright (explicit deletion, or post-archival cleanup).
    async fn delete(&self, machine_id: &str) -> StoreResult<()>;

    /// Page through rows whose `state` is one of `final_states`, used by
    /// the startup reconciliation scan.
    async fn scan_where_state_in(
        &self,
        final_states: &[String],
        page_cursor: Option<String>,
    ) -> StoreResult<Page>;
}

/// Append-only durable store for terminal machines, subject to retention.
///
/// Per the Open Question resolved in SPEC_FULL.md, this crate keeps one row
/// per machine (its final snapshot), not a full transition timeline.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Insert a row. Idempotent on `machine_id`: inserting the same id twice
    /// is a no-op, so archival retries never double-write.
    async fn insert(&self, row: SnapshotRow) -> StoreResult<()>;

    async fn find_latest(&self, machine_id: &str) -> StoreResult<Option<SnapshotRow>>;

    /// Delete every row older than `cutoff`. Implementations must not hold a
    /// single transaction across the entire store; batching/pagination is
    /// an implementation choice.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_row_defaults_online() {
        let row = SnapshotRow::new("m1", "IDLE", serde_json::json!({}), Utc::now());
        assert!(!row.is_offline);
    }
}
