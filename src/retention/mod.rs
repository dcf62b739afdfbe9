// Copyright (c) 2025 - Cowboy AI, Inc.
//! Periodic retention sweep over the history store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::info;

use crate::store::{HistoryStore, StoreError};

/// Periodically deletes history-store entries older than `retention_days`.
pub struct RetentionManager {
    history_store: Arc<dyn HistoryStore>,
    retention_days: u32,
}

impl RetentionManager {
    pub fn new(history_store: Arc<dyn HistoryStore>, retention_days: u32) -> Self {
        Self {
            history_store,
            retention_days,
        }
    }

    /// Run exactly one sweep synchronously — for tests and manual ops.
    pub async fn perform_cleanup_now(&self) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(self.retention_days as i64);
        let removed = self.history_store.delete_older_than(cutoff).await?;
        info!(removed, retention_days = self.retention_days, "retention sweep complete");
        Ok(removed)
    }

    /// Run [`RetentionManager::perform_cleanup_now`] on a fixed-delay
    /// schedule until [`RetentionHandle::stop`] is called.
    pub fn spawn(self: Arc<Self>, period: Duration) -> RetentionHandle {
        let stop = Arc::new(Notify::new());
        let stop_clone = stop.clone();
        let manager = self.clone();

        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(err) = manager.perform_cleanup_now().await {
                            tracing::error!(%err, "retention sweep failed");
                        }
                    }
                    _ = stop_clone.notified() => break,
                }
            }
        });

        RetentionHandle {
            stop,
            join: Some(join),
        }
    }
}

/// Handle to a background sweep loop started via [`RetentionManager::spawn`].
pub struct RetentionHandle {
    stop: Arc<Notify>,
    join: Option<JoinHandle<()>>,
}

impl RetentionHandle {
    pub async fn stop(mut self) {
        self.stop.notify_one();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryHistoryStore, SnapshotRow};
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn perform_cleanup_now_purges_stale_rows_only() {
        let history_store = Arc::new(MemoryHistoryStore::new());
        let now = Utc::now();
        history_store
            .insert(SnapshotRow::new("old", "DONE", serde_json::json!({}), now - ChronoDuration::days(40)))
            .await
            .unwrap();
        history_store
            .insert(SnapshotRow::new("new", "DONE", serde_json::json!({}), now))
            .await
            .unwrap();

        let manager = RetentionManager::new(history_store.clone(), 30);
        let removed = manager.perform_cleanup_now().await.unwrap();

        assert_eq!(removed, 1);
        assert!(history_store.contains("new"));
        assert!(!history_store.contains("old"));
    }
}
