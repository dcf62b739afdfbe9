// Copyright (c) 2025 - Cowboy AI, Inc.
//! Generic Finite State Machine Engine
//!
//! This module provides the runtime FSM engine described by the registry's
//! core contract: a definition of states, transitions, guards, and hooks,
//! shared immutably across every live instance of a machine type, plus one
//! mutable [`engine::FsmEngine`] per instance.
//!
//! # Design
//!
//! - **Definitions over enums**: unlike a compile-time `match`-based state
//!   machine, a [`definition::FsmDefinition`] is data — built once via
//!   [`definition::FsmDefinitionBuilder`] and shared by `Arc` across every
//!   instance of that machine type, because the registry may host millions
//!   of instances of a handful of machine types.
//! - **Deterministic dispatch**: no wall-clock read inside the engine.
//!   [`engine::FsmEngine::update`] advances an internal tick counter by
//!   exactly one each call, so timer behavior is exercised by calling
//!   `update()` directly in tests rather than by sleeping.
//! - **Polymorphic event matching**: events are a tagged variant
//!   ([`event::Event`]); whether a definition matches by value or by class
//!   is a property of the definition ([`event::MatchStrategy`]), never mixed
//!   within one definition.
//!
//! # Example
//!
//! ```rust
//! use fsm_registry::fsm::{Event, FsmDefinitionBuilder, FsmEngine, MatchStrategy};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let definition = FsmDefinitionBuilder::new("switch", MatchStrategy::ByValue)
//!     .state("Off")
//!     .state("On")
//!     .initial("Off")
//!     .on_event("Off", "Press", "On")
//!     .on_event("On", "Press", "Off")
//!     .build()
//!     .expect("valid definition");
//!
//! let mut engine = FsmEngine::new(Arc::new(definition), json!({}));
//! engine.init().expect("init");
//! engine.process(&Event::tagged("Press")).expect("transition");
//! assert_eq!(engine.current_state(), Some("On"));
//! ```

pub mod definition;
pub mod engine;
pub mod event;

pub use definition::{
    Action, ActionError, ContextData, DefinitionError, FsmDefinition, FsmDefinitionBuilder, Guard,
    Hook, StateConfig, StateId, TickHook, TransitionDef, Trigger,
};
pub use engine::{EngineError, FsmEngine, TIMEOUT_EVENT_TAG};
pub use event::{Event, MatchStrategy};
