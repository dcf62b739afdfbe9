//! Persistent state-machine runtime and registry for long-lived,
//! event-driven entities (e.g. telecom call/SMS sessions).
//!
//! Each entity is a finite-state machine whose current state, context, and
//! timers survive process restarts, memory eviction, and final-state
//! archival. The runtime hosts potentially millions of such machines,
//! materializing them lazily into memory on demand and evicting idle ones
//! while keeping durable state authoritative.
//!
//! # Architecture
//!
//! ```text
//! event(id) ──► Registry::create_or_get ──► FsmEngine::process
//!                                                  │
//!                                      SnapshotStore::upsert (write-through)
//!                                                  │
//!                                     final state? ─► ArchivalManager
//!                                                           │
//!                                              HistoryStore (subject to
//!                                              RetentionManager cleanup)
//! ```
//!
//! # Modules
//!
//! - [`fsm`] — the generic FSM engine: definitions, transitions, timers.
//! - [`store`] — [`store::SnapshotStore`]/[`store::HistoryStore`] traits
//!   plus an in-memory double used by this crate's own tests and `demos/`.
//! - [`registry`] — the live-instance index, create-or-get, and rehydration.
//! - [`archival`] — async migration of terminal machines to history.
//! - [`retention`] — periodic history-store cleanup.
//! - [`timer`] — the monotonic tick source driving timeouts.
//! - [`runtime`] — orchestration façade wiring the above together.
//! - [`config`] — [`config::RuntimeConfig`] and its component configs.
//! - [`errors`] — the top-level [`errors::RuntimeError`].
//!
//! # Quick start
//!
//! ```rust
//! use fsm_registry::{Event, FsmDefinitionBuilder, FsmEngine, MachineRuntime, MatchStrategy, RuntimeConfig};
//! use fsm_registry::store::{MemoryHistoryStore, MemorySnapshotStore};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let definition = Arc::new(
//!     FsmDefinitionBuilder::new("call", MatchStrategy::ByValue)
//!         .state("IDLE")
//!         .state("RINGING")
//!         .initial("IDLE")
//!         .on_event("IDLE", "IncomingCall", "RINGING")
//!         .build()
//!         .unwrap(),
//! );
//!
//! let runtime = Arc::new(MachineRuntime::new(
//!     Arc::new(MemorySnapshotStore::new()),
//!     Arc::new(MemoryHistoryStore::new()),
//!     RuntimeConfig::default(),
//! ));
//!
//! let factory = {
//!     let definition = definition.clone();
//!     Arc::new(move || FsmEngine::new(definition.clone(), serde_json::json!({})))
//! };
//!
//! let state = runtime
//!     .dispatch("call-1", &Event::tagged("IncomingCall"), factory)
//!     .await
//!     .unwrap();
//! assert_eq!(state, "RINGING");
//! # }
//! ```

pub mod archival;
pub mod config;
pub mod errors;
pub mod fsm;
pub mod registry;
pub mod retention;
pub mod runtime;
pub mod store;
pub mod timer;

pub use config::RuntimeConfig;
pub use errors::{RuntimeError, RuntimeResult};
pub use fsm::{Event, FsmDefinition, FsmDefinitionBuilder, FsmEngine, MatchStrategy};
pub use registry::{Registry, RegistryError};
pub use runtime::MachineRuntime;
pub use store::{HistoryStore, SnapshotRow, SnapshotStore};

/// Crate version, mirroring the teacher's own `VERSION` constant.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
