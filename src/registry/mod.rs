// Copyright (c) 2025 - Cowboy AI, Inc.
//! In-memory index of live FSM instances: create-or-get, eviction, and
//! event delivery.
//!
//! Grounded on `service::compute_resource`'s load-mutate-persist
//! transaction discipline (load current state, run the handler, persist,
//! publish), generalized here to a concurrent keyed index instead of one
//! load per call: [`dashmap::DashMap`] gives per-bucket internal locking
//! for the live-instance index itself, and each entry additionally holds a
//! `tokio::sync::Mutex` around its engine so that concurrent
//! `send_event`/`tick` calls for the *same* machine serialize while
//! different machines run fully in parallel, per the "no global locks,
//! contention is per-machine" resource model.

pub mod rehydrator;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};

use crate::archival::{ArchivalError, ArchivalNotifier};
use crate::fsm::{EngineError, Event, FsmEngine};
use crate::store::{SnapshotRow, SnapshotStore, StoreError};
use crate::timer::TimerWheel;

pub use rehydrator::{MachineFactory, RehydrateError, Rehydrator, RestoredContext};

/// Errors raised by [`Registry`] operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// `register` of an id already live in memory.
    #[error("machine {0} is already present in the registry")]
    AlreadyPresent(String),
    /// Rehydration failed (see [`RehydrateError`]).
    #[error("rehydration failed: {0}")]
    Rehydrate(#[from] RehydrateError),
    /// A storage backend call failed on the write-through path.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// The FSM engine itself rejected the event/call.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    /// The archival queue could not accept a just-terminated machine.
    #[error("archival backpressure for machine {0}")]
    Backpressure(String),
}

/// A handle to a live machine: the engine behind its own lock, plus
/// bookkeeping used for idle eviction.
///
/// `last_updated` is a plain millisecond-epoch atomic rather than an async
/// mutex around a `DateTime`: reading/writing it never needs to `.await`,
/// so [`Registry::evict_idle`] can scan every live entry without holding a
/// `DashMap` shard guard across a suspension point.
pub struct LiveEntry {
    engine: Arc<AsyncMutex<FsmEngine>>,
    last_updated_millis: AtomicI64,
}

impl LiveEntry {
    fn touch(&self) {
        self.last_updated_millis
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    fn last_updated(&self) -> chrono::DateTime<Utc> {
        chrono::DateTime::from_timestamp_millis(self.last_updated_millis.load(Ordering::SeqCst))
            .unwrap_or_else(Utc::now)
    }
}

/// In-memory map of live FSM instances, backed by a [`SnapshotStore`] and
/// fronted by create-or-get semantics.
///
/// At-most-one-live-instance is guaranteed by [`dashmap::mapref::entry`]'s
/// compute-if-absent discipline in [`Registry::create_or_get`]: concurrent
/// callers for an absent id race on the same shard lock, so exactly one of
/// them reserves the slot and runs the rehydrate-or-construct path; the
/// rest observe the winner's entry once the race resolves.
pub struct Registry {
    live: DashMap<String, Arc<LiveEntry>>,
    snapshot_store: Arc<dyn SnapshotStore>,
    rehydrator: Rehydrator,
    timer_wheel: Arc<TimerWheel>,
    archival: Option<Arc<dyn ArchivalNotifier>>,
}

impl Registry {
    pub fn new(
        snapshot_store: Arc<dyn SnapshotStore>,
        rehydrator: Rehydrator,
        timer_wheel: Arc<TimerWheel>,
        archival: Option<Arc<dyn ArchivalNotifier>>,
    ) -> Self {
        Self {
            live: DashMap::new(),
            snapshot_store,
            rehydrator,
            timer_wheel,
            archival,
        }
    }

    pub fn is_in_memory(&self, id: &str) -> bool {
        self.live.contains_key(id)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Insert an already-initialized machine into the live set. Fails if
    /// `id` is already live; does not touch the store.
    pub fn register(&self, id: &str, engine: FsmEngine) -> Result<(), RegistryError> {
        if self.live.contains_key(id) {
            return Err(RegistryError::AlreadyPresent(id.to_string()));
        }
        self.register_timer(id, &engine);
        self.live.insert(
            id.to_string(),
            Arc::new(LiveEntry {
                engine: Arc::new(AsyncMutex::new(engine)),
                last_updated_millis: AtomicI64::new(Utc::now().timestamp_millis()),
            }),
        );
        Ok(())
    }

    /// Cache-hit, rehydrate, or construct-and-init, in that order.
    ///
    /// `factory` is invoked at most once per absent id even under
    /// concurrent callers: the slot is reserved synchronously (under the
    /// `DashMap` shard lock) before any `.await` point, so every racing
    /// caller for the same id either wins the reservation or observes an
    /// already-occupied entry and returns that instead.
    #[instrument(skip(self, factory), fields(machine_id = %id))]
    pub async fn create_or_get(
        &self,
        id: &str,
        factory: MachineFactory,
    ) -> Result<Arc<AsyncMutex<FsmEngine>>, RegistryError> {
        let (reservation, just_reserved) = match self.live.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                (occupied.get().clone(), false)
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                // Reserve the slot with a throwaway engine before doing any
                // I/O. `factory` is a pure constructor (cheap `Arc::clone`
                // of the shared definition), so building one now and
                // possibly replacing it below if rehydration wins is
                // cheaper than making the map hold an `Option<FsmEngine>`
                // for every live machine just to defer this.
                let placeholder = Arc::new(LiveEntry {
                    engine: Arc::new(AsyncMutex::new(factory())),
                    last_updated_millis: AtomicI64::new(Utc::now().timestamp_millis()),
                });
                vacant.insert(placeholder.clone());
                (placeholder, true)
            }
        };

        if !just_reserved {
            return Ok(reservation.engine.clone());
        }

        let has_row = self
            .snapshot_store
            .find_latest(id)
            .await
            .map_err(RegistryError::Store)?
            .is_some();

        if has_row {
            match self.rehydrator.rehydrate(id, factory).await {
                Ok(engine) => {
                    *reservation.engine.lock().await = engine;
                }
                Err(err) => {
                    self.live.remove(id);
                    return Err(RegistryError::Rehydrate(err));
                }
            }
        } else {
            let mut engine = reservation.engine.lock().await;
            if let Err(err) = engine.init() {
                drop(engine);
                self.live.remove(id);
                return Err(RegistryError::Engine(err));
            }
            let row = SnapshotRow::new(
                id,
                engine.current_state().unwrap_or_default(),
                engine.context().clone(),
                Utc::now(),
            );
            drop(engine);
            if let Err(err) = self.snapshot_store.upsert(row).await {
                self.live.remove(id);
                return Err(RegistryError::Store(err));
            }
            info!(machine_id = %id, "created fresh machine");
        }

        {
            let engine = reservation.engine.lock().await;
            self.register_timer(id, &engine);
        }

        Ok(reservation.engine.clone())
    }

    fn register_timer(&self, id: &str, engine: &FsmEngine) {
        let wants_ticks = engine.current_state().is_some_and(|state| {
            engine
                .definition()
                .state_config(state)
                .is_some_and(|cfg| cfg.on_tick.is_some() || cfg.timeout_after.is_some())
        });
        if wants_ticks {
            self.timer_wheel.register(id);
        } else {
            self.timer_wheel.deregister(id);
        }
    }

    /// Remove `id` from the live set and mark its row offline. The
    /// snapshot itself is left untouched — eviction never deletes durable
    /// state.
    pub async fn remove_machine(&self, id: &str) -> Result<(), RegistryError> {
        self.live.remove(id);
        self.timer_wheel.deregister(id);
        self.snapshot_store.mark_offline(id, true).await?;
        Ok(())
    }

    /// Locate or rehydrate `id`, deliver `event`, persist the resulting
    /// snapshot, and — if the new state is terminal — notify archival and
    /// evict.
    #[instrument(skip(self, event, factory), fields(machine_id = %id, event_tag = event.tag()))]
    pub async fn send_event(
        &self,
        id: &str,
        event: &Event,
        factory: MachineFactory,
    ) -> Result<String, RegistryError> {
        let handle = self.create_or_get(id, factory).await?;
        let (state, context, is_terminal) = {
            let mut engine = handle.lock().await;
            engine.process(event)?;

            let state = engine.current_state().unwrap_or_default().to_string();
            let row = SnapshotRow::new(id, state.clone(), engine.context().clone(), Utc::now());
            self.snapshot_store.upsert(row).await?;
            debug!(machine_id = %id, state = %state, "persisted snapshot after transition");

            self.register_timer(id, &engine);
            (state, engine.context().clone(), engine.is_terminated())
        };

        if let Some(entry) = self.live.get(id) {
            entry.value().touch();
        }

        if is_terminal {
            self.live.remove(id);
            self.timer_wheel.deregister(id);
            if let Some(archival) = &self.archival {
                if let Err(ArchivalError::Backpressure) = archival.archive_machine(id, context) {
                    warn!(machine_id = %id, "archival queue full, machine left in active store for a later scan");
                    return Err(RegistryError::Backpressure(id.to_string()));
                }
            }
        }

        Ok(state)
    }

    /// Advance every one of `registered_ids` by one tick (the ids a
    /// [`TimerWheel::tick_once`] call just returned). Ids no longer live
    /// (already evicted or archived) are skipped.
    pub async fn tick(&self, registered_ids: &[String]) {
        for id in registered_ids {
            let Some(entry) = self.live.get(id).map(|e| e.value().clone()) else {
                continue;
            };

            let (state, context, is_terminal) = {
                let mut engine = entry.engine.lock().await;
                if let Err(err) = engine.update() {
                    warn!(machine_id = %id, %err, "tick update failed");
                    continue;
                }
                let state = engine.current_state().unwrap_or_default().to_string();
                let context = engine.context().clone();
                let is_terminal = engine.is_terminated();
                self.register_timer(id, &engine);
                (state, context, is_terminal)
            };

            if let Err(err) = self
                .snapshot_store
                .upsert(SnapshotRow::new(id, state, context.clone(), Utc::now()))
                .await
            {
                warn!(machine_id = %id, %err, "failed to persist snapshot after tick");
                continue;
            }

            if is_terminal {
                self.live.remove(id);
                self.timer_wheel.deregister(id);
                if let Some(archival) = &self.archival {
                    if let Err(ArchivalError::Backpressure) = archival.archive_machine(id, context) {
                        warn!(machine_id = %id, "archival queue full, machine left in active store for a later scan");
                    }
                }
            }
        }
    }

    /// Evict every live machine idle longer than `ttl`. A no-op if `ttl`
    /// is zero (disabled, per [`crate::config::RuntimeConfig`]).
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        if ttl.is_zero() {
            return 0;
        }
        let now = Utc::now();
        let mut to_evict = Vec::new();
        for entry in self.live.iter() {
            let last_updated = entry.value().last_updated();
            let idle = now.signed_duration_since(last_updated);
            if idle.to_std().map(|d| d > ttl).unwrap_or(false) {
                to_evict.push(entry.key().clone());
            }
        }
        let count = to_evict.len();
        for id in to_evict {
            let _ = self.remove_machine(&id).await;
        }
        count
    }
}
