// Copyright (c) 2025 - Cowboy AI, Inc.
//! Asynchronous archival: moves terminal machines from the active store to
//! the history store with retry, never blocking the event hot path.
//!
//! Grounded on `nats::MessageProcessor::run_handler`'s
//! `tokio::spawn`-a-consumer-task shape, generalized from "one subscriber
//! task per handler" to a bounded `mpsc` work queue shared by a fixed pool
//! of worker tasks.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::fsm::ContextData;
use crate::store::{HistoryStore, SnapshotStore, StoreError};

/// Errors raised by [`ArchivalManager`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ArchivalError {
    /// The archival queue is full beyond its configured bound.
    #[error("archival queue at capacity")]
    Backpressure,
}

/// An item queued for archival: a machine id plus the context observed at
/// enqueue time (diagnostic only — the worker re-reads the authoritative
/// row from the active store before moving it).
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub machine_id: String,
    pub context_snapshot: ContextData,
}

/// Attempted/succeeded/failed/retried/dead-lettered counters.
#[derive(Debug, Default)]
pub struct ArchivalStats {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Point-in-time copy of [`ArchivalStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub queue_depth: usize,
}

impl ArchivalStats {
    fn snapshot(&self, queue_depth: usize) -> StatsSnapshot {
        StatsSnapshot {
            attempted: self.attempted.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            retried: self.retried.load(Ordering::SeqCst),
            dead_lettered: self.dead_lettered.load(Ordering::SeqCst),
            queue_depth,
        }
    }
}

/// Injected collaborator the registry notifies when a machine reaches a
/// final state. Kept as a trait (rather than a direct dependency on
/// [`ArchivalManager`]) so the registry never needs to know how archival is
/// implemented.
pub trait ArchivalNotifier: Send + Sync {
    /// Enqueue `machine_id` for archival. Never blocks the caller beyond a
    /// configured bound; fails [`ArchivalError::Backpressure`] if the queue
    /// is full.
    fn archive_machine(&self, machine_id: &str, context: ContextData) -> Result<(), ArchivalError>;
}

/// Bounded work queue + worker pool moving terminal machines to history.
///
/// `sender` is `None` once [`ArchivalManager::shutdown`] has stopped
/// accepting new work; it is wrapped in a plain (never held across an
/// `.await`) [`std::sync::Mutex`] rather than the async one used for
/// `workers`, since `archive_machine` is a synchronous call on the event
/// hot path and cannot itself `.await` a lock.
pub struct ArchivalManager {
    sender: StdMutex<Option<mpsc::Sender<WorkItem>>>,
    stats: Arc<ArchivalStats>,
    workers: AsyncMutex<Vec<JoinHandle<()>>>,
    queue_capacity: usize,
}

impl ArchivalManager {
    /// Spawn `worker_count` workers consuming a shared bounded queue.
    pub fn spawn(
        snapshot_store: Arc<dyn SnapshotStore>,
        history_store: Arc<dyn HistoryStore>,
        worker_count: usize,
        queue_capacity: usize,
        max_retries: u32,
        backoff_base: Duration,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(queue_capacity);
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let stats = Arc::new(ArchivalStats::default());

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let receiver = receiver.clone();
            let snapshot_store = snapshot_store.clone();
            let history_store = history_store.clone();
            let stats = stats.clone();
            workers.push(tokio::spawn(async move {
                worker_loop(
                    worker_id,
                    receiver,
                    snapshot_store,
                    history_store,
                    stats,
                    max_retries,
                    backoff_base,
                )
                .await;
            }));
        }

        Arc::new(Self {
            sender: StdMutex::new(Some(sender)),
            stats,
            workers: AsyncMutex::new(workers),
            queue_capacity,
        })
    }

    /// Current attempted/succeeded/failed/retried/dead-lettered counters.
    pub fn stats(&self) -> StatsSnapshot {
        let queue_depth = self
            .sender
            .lock()
            .unwrap()
            .as_ref()
            .map(|sender| self.queue_capacity - sender.capacity())
            .unwrap_or(0);
        self.stats.snapshot(queue_depth)
    }

    /// Scan the active store for every row whose state is final and enqueue
    /// it. Used at startup to reconcile machines that reached a final state
    /// but were never archived (e.g. a prior crash between transition and
    /// archival).
    pub async fn move_all_finished_machines(
        &self,
        snapshot_store: &dyn SnapshotStore,
        final_states: &[String],
    ) -> Result<u64, StoreError> {
        let mut cursor = None;
        let mut enqueued = 0u64;
        loop {
            let Some(sender) = self.sender.lock().unwrap().clone() else {
                break;
            };
            let page = snapshot_store.scan_where_state_in(final_states, cursor).await?;
            let page_len = page.rows.len();
            for row in page.rows {
                let item = WorkItem {
                    machine_id: row.machine_id,
                    context_snapshot: row.context_data,
                };
                if sender.send(item).await.is_ok() {
                    enqueued += 1;
                }
            }
            cursor = page.next_cursor;
            if cursor.is_none() || page_len == 0 {
                break;
            }
        }
        info!(enqueued, "startup scan enqueued finished machines for archival");
        Ok(enqueued)
    }

    /// Stop accepting new work, drain the queue with a bounded grace period,
    /// then abort remaining workers.
    pub async fn shutdown(&self, grace: Duration) {
        // Dropping the sender closes the channel, so each worker's `recv()`
        // returns `None` once the queue drains rather than being cut off
        // mid-item.
        self.sender.lock().unwrap().take();

        let mut workers = self.workers.lock().await;
        let deadline = tokio::time::Instant::now() + grace;
        for mut handle in workers.drain(..) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, Pin::new(&mut handle)).await.is_err() {
                handle.abort();
            }
        }
    }
}

impl ArchivalNotifier for ArchivalManager {
    fn archive_machine(&self, machine_id: &str, context: ContextData) -> Result<(), ArchivalError> {
        self.sender
            .lock()
            .unwrap()
            .as_ref()
            .ok_or(ArchivalError::Backpressure)?
            .try_send(WorkItem {
                machine_id: machine_id.to_string(),
                context_snapshot: context,
            })
            .map_err(|_| ArchivalError::Backpressure)
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<AsyncMutex<mpsc::Receiver<WorkItem>>>,
    snapshot_store: Arc<dyn SnapshotStore>,
    history_store: Arc<dyn HistoryStore>,
    stats: Arc<ArchivalStats>,
    max_retries: u32,
    backoff_base: Duration,
) {
    loop {
        let item = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(item) = item else {
            break;
        };

        stats.attempted.fetch_add(1, Ordering::SeqCst);
        match archive_one(&item, snapshot_store.as_ref(), history_store.as_ref(), max_retries, backoff_base, &stats).await {
            Ok(()) => {
                stats.succeeded.fetch_add(1, Ordering::SeqCst);
            }
            Err(()) => {
                stats.failed.fetch_add(1, Ordering::SeqCst);
                stats.dead_lettered.fetch_add(1, Ordering::SeqCst);
                error!(worker_id, machine_id = %item.machine_id, "archival exhausted retries, parked in dead letter");
            }
        }
    }
}

async fn archive_one(
    item: &WorkItem,
    snapshot_store: &dyn SnapshotStore,
    history_store: &dyn HistoryStore,
    max_retries: u32,
    backoff_base: Duration,
    stats: &ArchivalStats,
) -> Result<(), ()> {
    let mut attempt = 0u32;
    loop {
        match try_archive(item, snapshot_store, history_store).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < max_retries => {
                attempt += 1;
                stats.retried.fetch_add(1, Ordering::SeqCst);
                warn!(machine_id = %item.machine_id, attempt, %err, "archival attempt failed, retrying");
                let backoff = backoff_base * 2u32.saturating_pow(attempt.saturating_sub(1));
                tokio::time::sleep(backoff).await;
            }
            Err(_) => return Err(()),
        }
    }
}

async fn try_archive(
    item: &WorkItem,
    snapshot_store: &dyn SnapshotStore,
    history_store: &dyn HistoryStore,
) -> Result<(), StoreError> {
    let Some(row) = snapshot_store.find_latest(&item.machine_id).await? else {
        // Already moved (or never existed): idempotent no-op.
        return Ok(());
    };
    history_store.insert(row).await?;
    snapshot_store.delete(&item.machine_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryHistoryStore, MemorySnapshotStore, SnapshotRow};
    use chrono::Utc;

    /// A [`HistoryStore`] wrapper whose `insert` fails transiently a fixed
    /// number of times before delegating to the inner store. Used to
    /// exercise the worker's retry/backoff path deterministically.
    struct FlakyHistoryStore {
        inner: Arc<MemoryHistoryStore>,
        failures_remaining: AtomicU64,
    }

    impl FlakyHistoryStore {
        fn new(inner: Arc<MemoryHistoryStore>, failures: u64) -> Self {
            Self {
                inner,
                failures_remaining: AtomicU64::new(failures),
            }
        }
    }

    #[async_trait::async_trait]
    impl HistoryStore for FlakyHistoryStore {
        async fn insert(&self, row: SnapshotRow) -> Result<(), StoreError> {
            if self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    if n > 0 {
                        Some(n - 1)
                    } else {
                        None
                    }
                })
                .is_ok()
            {
                return Err(StoreError::Unavailable("transient failure".to_string()));
            }
            self.inner.insert(row).await
        }

        async fn find_latest(&self, machine_id: &str) -> Result<Option<SnapshotRow>, StoreError> {
            self.inner.find_latest(machine_id).await
        }

        async fn delete_older_than(&self, cutoff: chrono::DateTime<Utc>) -> Result<u64, StoreError> {
            self.inner.delete_older_than(cutoff).await
        }
    }

    #[tokio::test]
    async fn archives_and_removes_from_active_store() {
        let snapshot_store = Arc::new(MemorySnapshotStore::new());
        let history_store = Arc::new(MemoryHistoryStore::new());
        snapshot_store
            .upsert(SnapshotRow::new("m1", "COMPLETED", serde_json::json!({}), Utc::now()))
            .await
            .unwrap();

        let manager = ArchivalManager::spawn(
            snapshot_store.clone(),
            history_store.clone(),
            2,
            16,
            3,
            Duration::from_millis(1),
        );
        manager.archive_machine("m1", serde_json::json!({})).unwrap();

        for _ in 0..100 {
            if history_store.contains("m1") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(history_store.contains("m1"));
        assert!(snapshot_store.find_latest("m1").await.unwrap().is_none());
        manager.shutdown(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn move_all_finished_machines_enqueues_only_final_states() {
        let snapshot_store = Arc::new(MemorySnapshotStore::new());
        let history_store = Arc::new(MemoryHistoryStore::new());
        snapshot_store
            .upsert(SnapshotRow::new("m1", "COMPLETED", serde_json::json!({}), Utc::now()))
            .await
            .unwrap();
        snapshot_store
            .upsert(SnapshotRow::new("m2", "FAILED", serde_json::json!({}), Utc::now()))
            .await
            .unwrap();
        snapshot_store
            .upsert(SnapshotRow::new("m3", "ACTIVE", serde_json::json!({}), Utc::now()))
            .await
            .unwrap();

        let manager = ArchivalManager::spawn(
            snapshot_store.clone(),
            history_store.clone(),
            2,
            16,
            3,
            Duration::from_millis(1),
        );

        let final_states = vec!["COMPLETED".to_string(), "FAILED".to_string()];
        let enqueued = manager
            .move_all_finished_machines(snapshot_store.as_ref(), &final_states)
            .await
            .unwrap();
        assert_eq!(enqueued, 2);

        for _ in 0..100 {
            if history_store.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(history_store.contains("m1"));
        assert!(history_store.contains("m2"));
        assert!(!history_store.contains("m3"));
        assert!(snapshot_store.find_latest("m3").await.unwrap().is_some());
        manager.shutdown(Duration::from_millis(50)).await;
    }

    /// S6 — history insert fails transiently twice then succeeds: stats show
    /// `retried >= 2`, `succeeded == 1`, and the row leaves the active store.
    #[tokio::test]
    async fn archival_retries_transient_failures_then_succeeds() {
        let snapshot_store = Arc::new(MemorySnapshotStore::new());
        let inner_history = Arc::new(MemoryHistoryStore::new());
        let flaky_history: Arc<dyn HistoryStore> =
            Arc::new(FlakyHistoryStore::new(inner_history.clone(), 2));
        snapshot_store
            .upsert(SnapshotRow::new("m6", "COMPLETED", serde_json::json!({}), Utc::now()))
            .await
            .unwrap();

        let manager = ArchivalManager::spawn(
            snapshot_store.clone(),
            flaky_history,
            1,
            16,
            5,
            Duration::from_millis(1),
        );
        manager.archive_machine("m6", serde_json::json!({})).unwrap();

        for _ in 0..200 {
            if inner_history.contains("m6") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let stats = manager.stats();
        assert!(stats.retried >= 2, "expected at least 2 retries, got {}", stats.retried);
        assert_eq!(stats.succeeded, 1);
        assert!(inner_history.contains("m6"));
        assert!(snapshot_store.find_latest("m6").await.unwrap().is_none());
        manager.shutdown(Duration::from_millis(50)).await;
    }
}
