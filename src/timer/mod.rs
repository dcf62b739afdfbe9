// Copyright (c) 2025 - Cowboy AI, Inc.
//! Timer wheel: the single monotonic tick source driving per-state timeouts.
//!
//! A machine's current state is "registered" with the wheel exactly while
//! that state has a tick hook or a timeout configured; the registry
//! registers/deregisters a machine on every entry/exit (including on
//! rehydration and `setState`). On each tick, the wheel hands the registered
//! ids back to its caller (ticks are driven from outside — by a background
//! `tokio::time::interval` loop, or by a test calling
//! [`TimerWheel::tick_once`] directly), which is what lets timer behavior be
//! exercised deterministically in tests rather than by sleeping on wall time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

/// Tracks which machine ids currently need `update()` delivered on tick.
#[derive(Debug, Default)]
pub struct TimerWheel {
    registered: DashSet<String>,
    tick_count: AtomicU64,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `machine_id` to receive `update()` on every future tick.
    pub fn register(&self, machine_id: &str) {
        self.registered.insert(machine_id.to_string());
    }

    /// Stop delivering ticks to `machine_id` (on exit of a timed state, or
    /// on eviction).
    pub fn deregister(&self, machine_id: &str) {
        self.registered.remove(machine_id);
    }

    pub fn is_registered(&self, machine_id: &str) -> bool {
        self.registered.contains(machine_id)
    }

    /// Monotonic tick counter, incremented once per [`TimerWheel::tick_once`].
    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::SeqCst)
    }

    /// Advance the wheel by exactly one tick, returning the ids that should
    /// receive `update()` for this tick. Deterministic and synchronous, for
    /// tests.
    pub fn tick_once(&self) -> Vec<String> {
        self.tick_count.fetch_add(1, Ordering::SeqCst);
        self.registered.iter().map(|id| id.clone()).collect()
    }

    /// Spawn a background task that calls `tick_once` and hands its result
    /// to `on_tick` every `period`, until [`TimerHandle::stop`] is called.
    pub fn spawn(self: &Arc<Self>, period: Duration, on_tick: impl Fn(Vec<String>) + Send + Sync + 'static) -> TimerHandle {
        let wheel = self.clone();
        let stop = Arc::new(Notify::new());
        let stop_clone = stop.clone();

        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let ids = wheel.tick_once();
                        debug!(tick = wheel.tick_count(), registered = ids.len(), "timer wheel tick");
                        on_tick(ids);
                    }
                    _ = stop_clone.notified() => break,
                }
            }
        });

        TimerHandle {
            stop,
            join: Some(join),
        }
    }
}

/// Handle to a background tick loop started via [`TimerWheel::spawn`].
pub struct TimerHandle {
    stop: Arc<Notify>,
    join: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// Stop the background loop and wait for it to finish.
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

    #[test]
    fn register_deregister_roundtrip() {
        let wheel = TimerWheel::new();
        wheel.register("m1");
        assert!(wheel.is_registered("m1"));
        wheel.deregister("m1");
        assert!(!wheel.is_registered("m1"));
    }

    #[test]
    fn tick_once_returns_registered_ids_and_advances_counter() {
        let wheel = TimerWheel::new();
        wheel.register("m1");
        wheel.register("m2");
        let ids = wheel.tick_once();
        assert_eq!(ids.len(), 2);
        assert_eq!(wheel.tick_count(), 1);
        wheel.tick_once();
        assert_eq!(wheel.tick_count(), 2);
    }
}
