// Copyright (c) 2025 - Cowboy AI, Inc.
//! Orchestration façade wiring a [`Registry`] to a [`TimerWheel`], an
//! [`ArchivalManager`], and a [`RetentionManager`] behind the handful of
//! operations a host process actually calls.
//!
//! Grounded on `service::EventSourcedComputeResourceService`, which wires a
//! command handler, an event store, and a message bus behind one
//! `async_trait` service interface — `MachineRuntime` is the same shape of
//! pure wiring, generalized to the registry's own components. This module
//! adds no semantics beyond what [`crate::fsm`], [`crate::registry`],
//! [`crate::archival`], and [`crate::retention`] already define.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::archival::{ArchivalManager, ArchivalNotifier};
use crate::config::RuntimeConfig;
use crate::errors::{RuntimeError, RuntimeResult};
use crate::fsm::{Event, FsmEngine};
use crate::registry::{MachineFactory, Registry, Rehydrator};
use crate::retention::{RetentionHandle, RetentionManager};
use crate::store::{HistoryStore, SnapshotStore};
use crate::timer::{TimerHandle, TimerWheel};
use tokio::sync::Mutex as AsyncMutex;

/// Owns every long-lived component a host process needs and exposes the
/// operations it actually drives: `dispatch`, `tick`, `evict_idle`,
/// `shutdown`.
pub struct MachineRuntime {
    registry: Arc<Registry>,
    timer_wheel: Arc<TimerWheel>,
    archival: Arc<ArchivalManager>,
    retention: Arc<RetentionManager>,
    config: RuntimeConfig,
    timer_handle: AsyncMutex<Option<TimerHandle>>,
    retention_handle: AsyncMutex<Option<RetentionHandle>>,
}

impl MachineRuntime {
    /// Wire a fresh runtime from its storage backends and configuration.
    pub fn new(
        snapshot_store: Arc<dyn SnapshotStore>,
        history_store: Arc<dyn HistoryStore>,
        config: RuntimeConfig,
    ) -> Self {
        let timer_wheel = Arc::new(TimerWheel::new());
        let archival = ArchivalManager::spawn(
            snapshot_store.clone(),
            history_store.clone(),
            config.archival.workers,
            config.archival.queue_capacity,
            config.archival.max_retries,
            config.archival.backoff_base,
        );
        let rehydrator = Rehydrator::new(
            snapshot_store.clone(),
            history_store.clone(),
            config.rehydrate_timeout,
        );
        let registry = Arc::new(Registry::new(
            snapshot_store,
            rehydrator,
            timer_wheel.clone(),
            Some(archival.clone() as Arc<dyn ArchivalNotifier>),
        ));
        let retention = Arc::new(RetentionManager::new(history_store, config.retention_days));

        Self {
            registry,
            timer_wheel,
            archival,
            retention,
            config,
            timer_handle: AsyncMutex::new(None),
            retention_handle: AsyncMutex::new(None),
        }
    }

    /// Start the background timer-wheel loop and retention sweeper. Safe to
    /// call once after construction; a second call replaces the running
    /// loops after stopping the old ones.
    pub async fn start(self: &Arc<Self>) {
        let registry = self.registry.clone();
        let timer_handle = self.timer_wheel.spawn(self.config.tick_period, move |ids| {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry.tick(&ids).await;
            });
        });
        *self.timer_handle.lock().await = Some(timer_handle);

        let retention_period = Duration::from_secs(24 * 60 * 60);
        let retention_handle = self.retention.clone().spawn(retention_period);
        *self.retention_handle.lock().await = Some(retention_handle);

        info!("machine runtime started");
    }

    /// Run the startup reconciliation scan: enqueue every row already in a
    /// final state for archival (e.g. machines that transitioned but never
    /// got archived before a prior crash).
    pub async fn reconcile_on_startup(
        &self,
        snapshot_store: &dyn SnapshotStore,
        final_states: &[String],
    ) -> RuntimeResult<u64> {
        self.archival
            .move_all_finished_machines(snapshot_store, final_states)
            .await
            .map_err(RuntimeError::from)
    }

    /// Deliver `event` to machine `id`, creating or rehydrating it first if
    /// necessary.
    pub async fn dispatch(
        &self,
        id: &str,
        event: &Event,
        factory: MachineFactory,
    ) -> RuntimeResult<String> {
        self.registry
            .send_event(id, event, factory)
            .await
            .map_err(RuntimeError::from)
    }

    /// Create-or-get without delivering an event, for callers that need the
    /// handle itself (e.g. to inspect context before deciding what to send).
    pub async fn create_or_get(
        &self,
        id: &str,
        factory: MachineFactory,
    ) -> RuntimeResult<Arc<AsyncMutex<FsmEngine>>> {
        self.registry
            .create_or_get(id, factory)
            .await
            .map_err(RuntimeError::from)
    }

    /// Run one idle-eviction sweep now, per `registry.idleTtlMs`.
    pub async fn evict_idle(&self) -> usize {
        self.registry.evict_idle(self.config.idle_ttl).await
    }

    pub fn archival_stats(&self) -> crate::archival::StatsSnapshot {
        self.archival.stats()
    }

    pub fn live_count(&self) -> usize {
        self.registry.live_count()
    }

    /// Stop accepting new work across every background component and drain
    /// with a bounded grace period.
    pub async fn shutdown(&self, grace: Duration) {
        if let Some(handle) = self.timer_handle.lock().await.take() {
            handle.stop().await;
        }
        if let Some(handle) = self.retention_handle.lock().await.take() {
            handle.stop().await;
        }
        self.archival.shutdown(grace).await;
        info!("machine runtime shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::{FsmDefinition, FsmDefinitionBuilder, MatchStrategy};
    use crate::store::{MemoryHistoryStore, MemorySnapshotStore};

    fn call_definition() -> Arc<FsmDefinition> {
        Arc::new(
            FsmDefinitionBuilder::new("call", MatchStrategy::ByValue)
                .state("IDLE")
                .state("RINGING")
                .state("COMPLETED")
                .final_state("COMPLETED")
                .initial("IDLE")
                .on_event("IDLE", "IncomingCall", "RINGING")
                .on_event("RINGING", "HangUp", "COMPLETED")
                .build()
                .unwrap(),
        )
    }

    fn factory() -> MachineFactory {
        let def = call_definition();
        Arc::new(move || FsmEngine::new(def.clone(), serde_json::json!({})))
    }

    #[tokio::test]
    async fn dispatch_creates_and_transitions() {
        let snapshot_store = Arc::new(MemorySnapshotStore::new());
        let history_store = Arc::new(MemoryHistoryStore::new());
        let runtime = Arc::new(MachineRuntime::new(
            snapshot_store.clone(),
            history_store,
            RuntimeConfig::default(),
        ));

        let state = runtime
            .dispatch("m1", &Event::tagged("IncomingCall"), factory())
            .await
            .unwrap();
        assert_eq!(state, "RINGING");
        assert_eq!(runtime.live_count(), 1);
    }

    #[tokio::test]
    async fn dispatch_to_terminal_state_archives_and_evicts() {
        let snapshot_store = Arc::new(MemorySnapshotStore::new());
        let history_store = Arc::new(MemoryHistoryStore::new());
        let runtime = Arc::new(MachineRuntime::new(
            snapshot_store.clone(),
            history_store.clone(),
            RuntimeConfig::default(),
        ));

        runtime
            .dispatch("m2", &Event::tagged("IncomingCall"), factory())
            .await
            .unwrap();
        runtime
            .dispatch("m2", &Event::tagged("HangUp"), factory())
            .await
            .unwrap();
        assert_eq!(runtime.live_count(), 0);

        for _ in 0..100 {
            if history_store.contains("m2") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(history_store.contains("m2"));
        assert!(snapshot_store.find_latest("m2").await.unwrap().is_none());

        runtime.shutdown(Duration::from_millis(50)).await;
    }
}
