// Copyright (c) 2025 - Cowboy AI, Inc.
//! Reconstructs a live [`FsmEngine`] from its latest durable snapshot.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::fsm::{ContextData, EngineError, FsmEngine};
use crate::store::{HistoryStore, SnapshotStore, StoreError};

/// A factory producing a fresh, uninitialized engine of the correct
/// definition. Supplied by the caller (the registry never constructs
/// machine types itself).
pub type MachineFactory = Arc<dyn Fn() -> FsmEngine + Send + Sync>;

/// Errors raised by [`Rehydrator::rehydrate`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum RehydrateError {
    /// The id exists only in the history store: the machine already
    /// finished its lifecycle.
    #[error("machine {0} already terminated")]
    AlreadyTerminated(String),
    /// The backend could not be reached; retryable.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    /// The persisted `context_data` could not be decoded.
    #[error("corrupt snapshot for {machine_id}: {reason}")]
    CorruptSnapshot { machine_id: String, reason: String },
    /// The persisted state name is not in the current definition.
    #[error("persisted state {state:?} is not declared by the current definition for {machine_id}")]
    DefinitionMismatch { machine_id: String, state: String },
    /// The rehydration call exceeded its configured timeout.
    #[error("rehydration of {0} timed out")]
    TimedOut(String),
}

impl From<StoreError> for RehydrateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => RehydrateError::StoreUnavailable(msg),
            StoreError::CorruptSnapshot { machine_id, reason } => {
                RehydrateError::CorruptSnapshot { machine_id, reason }
            }
            StoreError::Backend(msg) => RehydrateError::StoreUnavailable(msg),
        }
    }
}

impl From<EngineError> for RehydrateError {
    fn from(err: EngineError) -> Self {
        RehydrateError::StoreUnavailable(err.to_string())
    }
}

/// Loads a snapshot and reconstructs a live instance.
pub struct Rehydrator {
    snapshot_store: Arc<dyn SnapshotStore>,
    history_store: Arc<dyn HistoryStore>,
    timeout: Duration,
}

impl Rehydrator {
    pub fn new(
        snapshot_store: Arc<dyn SnapshotStore>,
        history_store: Arc<dyn HistoryStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            snapshot_store,
            history_store,
            timeout,
        }
    }

    /// Fetch the latest snapshot (active store first), build a fresh
    /// instance via `factory`, force-enter the persisted state (running
    /// `on_entry` and resetting the timer), restore context verbatim, and
    /// clear `is_offline` in the store.
    pub async fn rehydrate(
        &self,
        machine_id: &str,
        factory: MachineFactory,
    ) -> Result<FsmEngine, RehydrateError> {
        match tokio::time::timeout(self.timeout, self.rehydrate_inner(machine_id, factory)).await {
            Ok(result) => result,
            Err(_) => Err(RehydrateError::TimedOut(machine_id.to_string())),
        }
    }

    async fn rehydrate_inner(
        &self,
        machine_id: &str,
        factory: MachineFactory,
    ) -> Result<FsmEngine, RehydrateError> {
        let row = self.snapshot_store.find_latest(machine_id).await?;
        let row = match row {
            Some(row) => row,
            None => {
                if self.history_store.find_latest(machine_id).await?.is_some() {
                    return Err(RehydrateError::AlreadyTerminated(machine_id.to_string()));
                }
                return Err(RehydrateError::CorruptSnapshot {
                    machine_id: machine_id.to_string(),
                    reason: "no active or history row found".to_string(),
                });
            }
        };

        let mut engine = factory();
        if !engine.definition().has_state(&row.state) {
            return Err(RehydrateError::DefinitionMismatch {
                machine_id: machine_id.to_string(),
                state: row.state,
            });
        }

        engine.set_state(&row.state)?;
        engine.set_context(row.context_data);

        self.snapshot_store.mark_offline(machine_id, false).await?;
        debug!(machine_id, state = engine.current_state(), "rehydrated machine");
        Ok(engine)
    }
}

/// Convenience alias used across the registry for context payloads restored
/// during rehydration.
pub type RestoredContext = ContextData;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::{FsmDefinition, FsmDefinitionBuilder, MatchStrategy};
    use crate::store::{MemoryHistoryStore, MemorySnapshotStore, SnapshotRow};
    use chrono::Utc;

    fn call_definition() -> Arc<FsmDefinition> {
        Arc::new(
            FsmDefinitionBuilder::new("call", MatchStrategy::ByValue)
                .state("IDLE")
                .state("RINGING")
                .state("CONNECTED")
                .initial("IDLE")
                .on_event("IDLE", "IncomingCall", "RINGING")
                .on_event("RINGING", "Answer", "CONNECTED")
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn rehydrates_from_active_store() {
        let snapshot_store = Arc::new(MemorySnapshotStore::new());
        let history_store = Arc::new(MemoryHistoryStore::new());
        snapshot_store
            .upsert(SnapshotRow {
                is_offline: true,
                ..SnapshotRow::new("c1", "RINGING", serde_json::json!({"from": "555"}), Utc::now())
            })
            .await
            .unwrap();

        let rehydrator = Rehydrator::new(snapshot_store.clone(), history_store, Duration::from_secs(1));
        let def = call_definition();
        let engine = rehydrator
            .rehydrate("c1", Arc::new(move || FsmEngine::new(def.clone(), serde_json::json!({}))))
            .await
            .unwrap();

        assert_eq!(engine.current_state(), Some("RINGING"));
        assert_eq!(engine.context()["from"], "555");
        assert!(!snapshot_store.find_latest("c1").await.unwrap().unwrap().is_offline);
    }

    #[tokio::test]
    async fn already_terminated_when_only_in_history() {
        let snapshot_store = Arc::new(MemorySnapshotStore::new());
        let history_store = Arc::new(MemoryHistoryStore::new());
        history_store
            .insert(SnapshotRow::new("c2", "CONNECTED", serde_json::json!({}), Utc::now()))
            .await
            .unwrap();

        let rehydrator = Rehydrator::new(snapshot_store, history_store, Duration::from_secs(1));
        let def = call_definition();
        let err = rehydrator
            .rehydrate("c2", Arc::new(move || FsmEngine::new(def.clone(), serde_json::json!({}))))
            .await
            .unwrap_err();
        assert!(matches!(err, RehydrateError::AlreadyTerminated(_)));
    }

    #[tokio::test]
    async fn definition_mismatch_when_state_unknown() {
        let snapshot_store = Arc::new(MemorySnapshotStore::new());
        let history_store = Arc::new(MemoryHistoryStore::new());
        snapshot_store
            .upsert(SnapshotRow::new("c3", "NONEXISTENT", serde_json::json!({}), Utc::now()))
            .await
            .unwrap();

        let rehydrator = Rehydrator::new(snapshot_store, history_store, Duration::from_secs(1));
        let def = call_definition();
        let err = rehydrator
            .rehydrate("c3", Arc::new(move || FsmEngine::new(def.clone(), serde_json::json!({}))))
            .await
            .unwrap_err();
        assert!(matches!(err, RehydrateError::DefinitionMismatch { .. }));
    }
}
