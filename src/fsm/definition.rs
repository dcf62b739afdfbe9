//! Immutable FSM definitions: states, transitions, guards, actions, timers.
//!
//! A [`FsmDefinition`] is built once per machine *type* and shared (via
//! `Arc`) across every live instance of that type — the instance itself
//! holds only the definition's identity plus its own mutable state, per the
//! cyclic-reference design note: instances never reference the registry or
//! the definition's owner directly.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::fsm::event::{Event, MatchStrategy};

/// Opaque, cheaply-cloned context payload owned by an FSM instance.
pub type ContextData = serde_json::Value;

/// A guard evaluated against the current context and the triggering event.
pub type Guard = Arc<dyn Fn(&Event, &ContextData) -> bool + Send + Sync>;

/// An action run as part of a transition. Returning `Err` aborts the
/// transition: no state change is committed and no snapshot is written.
pub type Action = Arc<dyn Fn(&Event, &mut ContextData) -> Result<(), ActionError> + Send + Sync>;

/// An entry/exit hook, run with no triggering event.
pub type Hook = Arc<dyn Fn(&mut ContextData) -> Result<(), ActionError> + Send + Sync>;

/// A per-tick hook, given the number of ticks spent in the current state.
pub type TickHook = Arc<dyn Fn(&mut ContextData, u64) -> Result<(), ActionError> + Send + Sync>;

/// Error raised by a user-supplied guard/action/hook.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ActionError(pub String);

impl ActionError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A named state, identified by a cheaply-cloned interned string.
pub type StateId = Arc<str>;

/// What triggers a transition: an external event, or a state's own timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Matched against incoming events per the definition's [`MatchStrategy`].
    Event(Arc<str>),
    /// Consulted only by [`crate::fsm::engine::FsmEngine::update`], once
    /// `duration(from) >= timeout_after(from)`.
    Timeout,
}

/// One `(from, trigger, guard, action, to)` entry.
#[derive(Clone)]
pub struct TransitionDef {
    pub from: StateId,
    pub trigger: Trigger,
    pub guard: Option<Guard>,
    pub action: Option<Action>,
    pub to: StateId,
    /// `from == to` transitions may additionally be marked `stay`: a stay
    /// transition never re-runs `on_exit`/`on_entry`, only its action.
    pub stay: bool,
}

impl fmt::Debug for TransitionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionDef")
            .field("from", &self.from)
            .field("trigger", &self.trigger)
            .field("to", &self.to)
            .field("stay", &self.stay)
            .field("has_guard", &self.guard.is_some())
            .field("has_action", &self.action.is_some())
            .finish()
    }
}

/// Per-state optional hooks and timeout configuration.
#[derive(Clone, Default)]
pub struct StateConfig {
    pub on_entry: Option<Hook>,
    pub on_exit: Option<Hook>,
    pub on_tick: Option<TickHook>,
    /// Ticks after which this state's timeout transition becomes eligible.
    pub timeout_after: Option<u64>,
}

impl fmt::Debug for StateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateConfig")
            .field("has_on_entry", &self.on_entry.is_some())
            .field("has_on_exit", &self.on_exit.is_some())
            .field("has_on_tick", &self.on_tick.is_some())
            .field("timeout_after", &self.timeout_after)
            .finish()
    }
}

/// Error building a [`FsmDefinition`].
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("initial state {0:?} is not a declared state")]
    UnknownInitialState(String),
    #[error("final state {0:?} is not a declared state")]
    UnknownFinalState(String),
    #[error("transition references undeclared state {0:?}")]
    UnknownTransitionState(String),
    #[error("definition has no declared states")]
    NoStates,
}

/// Immutable description of a machine type: its states, transitions, and hooks.
///
/// Shared across every live instance of the type via `Arc<FsmDefinition>`.
#[derive(Clone)]
pub struct FsmDefinition {
    pub(crate) name: Arc<str>,
    pub(crate) match_strategy: MatchStrategy,
    pub(crate) states: Vec<StateId>,
    pub(crate) initial_state: StateId,
    pub(crate) final_states: Vec<StateId>,
    pub(crate) state_configs: HashMap<StateId, StateConfig>,
    pub(crate) transitions: Vec<TransitionDef>,
}

impl fmt::Debug for FsmDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsmDefinition")
            .field("name", &self.name)
            .field("match_strategy", &self.match_strategy)
            .field("states", &self.states)
            .field("initial_state", &self.initial_state)
            .field("final_states", &self.final_states)
            .field("transitions", &self.transitions.len())
            .finish()
    }
}

impl FsmDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn match_strategy(&self) -> MatchStrategy {
        self.match_strategy
    }

    pub fn initial_state(&self) -> &StateId {
        &self.initial_state
    }

    pub fn is_final(&self, state: &str) -> bool {
        self.final_states.iter().any(|s| s.as_ref() == state)
    }

    pub fn has_state(&self, state: &str) -> bool {
        self.states.iter().any(|s| s.as_ref() == state)
    }

    pub fn state_config(&self, state: &str) -> Option<&StateConfig> {
        self.state_configs.get(state)
    }

    pub fn transitions_from(&self, state: &str) -> impl Iterator<Item = &TransitionDef> {
        self.transitions.iter().filter(move |t| t.from.as_ref() == state)
    }
}

/// Builder for [`FsmDefinition`], grounded on the teacher's preference for
/// explicit, declaration-ordered construction over derive-macro magic.
pub struct FsmDefinitionBuilder {
    name: Arc<str>,
    match_strategy: MatchStrategy,
    states: Vec<StateId>,
    initial_state: Option<StateId>,
    final_states: Vec<StateId>,
    state_configs: HashMap<StateId, StateConfig>,
    transitions: Vec<TransitionDef>,
}

impl FsmDefinitionBuilder {
    pub fn new(name: impl Into<Arc<str>>, match_strategy: MatchStrategy) -> Self {
        Self {
            name: name.into(),
            match_strategy,
            states: Vec::new(),
            initial_state: None,
            final_states: Vec::new(),
            state_configs: HashMap::new(),
            transitions: Vec::new(),
        }
    }

    pub fn state(mut self, id: impl Into<Arc<str>>) -> Self {
        let id = id.into();
        self.state_configs.entry(id.clone()).or_default();
        self.states.push(id);
        self
    }

    pub fn initial(mut self, id: impl Into<Arc<str>>) -> Self {
        self.initial_state = Some(id.into());
        self
    }

    pub fn final_state(mut self, id: impl Into<Arc<str>>) -> Self {
        self.final_states.push(id.into());
        self
    }

    pub fn on_entry(mut self, state: impl Into<Arc<str>>, hook: Hook) -> Self {
        self.state_configs.entry(state.into()).or_default().on_entry = Some(hook);
        self
    }

    pub fn on_exit(mut self, state: impl Into<Arc<str>>, hook: Hook) -> Self {
        self.state_configs.entry(state.into()).or_default().on_exit = Some(hook);
        self
    }

    pub fn on_tick(mut self, state: impl Into<Arc<str>>, hook: TickHook) -> Self {
        self.state_configs.entry(state.into()).or_default().on_tick = Some(hook);
        self
    }

    pub fn timeout_after(mut self, state: impl Into<Arc<str>>, ticks: u64) -> Self {
        self.state_configs.entry(state.into()).or_default().timeout_after = Some(ticks);
        self
    }

    /// A transition triggered by a matching event.
    pub fn on_event(
        mut self,
        from: impl Into<Arc<str>>,
        event_key: impl Into<Arc<str>>,
        to: impl Into<Arc<str>>,
    ) -> Self {
        self.transitions.push(TransitionDef {
            from: from.into(),
            trigger: Trigger::Event(event_key.into()),
            guard: None,
            action: None,
            to: to.into(),
            stay: false,
        });
        self
    }

    /// A `stay` transition: `from == to`, never re-runs entry/exit.
    pub fn stay_on_event(
        mut self,
        state: impl Into<Arc<str>>,
        event_key: impl Into<Arc<str>>,
    ) -> Self {
        let state = state.into();
        self.transitions.push(TransitionDef {
            from: state.clone(),
            trigger: Trigger::Event(event_key.into()),
            guard: None,
            action: None,
            to: state,
            stay: true,
        });
        self
    }

    /// The transition `update()` fires once `duration(from) >= timeout_after(from)`.
    pub fn on_timeout(mut self, from: impl Into<Arc<str>>, to: impl Into<Arc<str>>) -> Self {
        self.transitions.push(TransitionDef {
            from: from.into(),
            trigger: Trigger::Timeout,
            guard: None,
            action: None,
            to: to.into(),
            stay: false,
        });
        self
    }

    /// Attach a guard to the most recently added transition.
    pub fn guard(mut self, guard: Guard) -> Self {
        if let Some(last) = self.transitions.last_mut() {
            last.guard = Some(guard);
        }
        self
    }

    /// Attach an action to the most recently added transition.
    pub fn action(mut self, action: Action) -> Self {
        if let Some(last) = self.transitions.last_mut() {
            last.action = Some(action);
        }
        self
    }

    pub fn build(self) -> Result<FsmDefinition, DefinitionError> {
        if self.states.is_empty() {
            return Err(DefinitionError::NoStates);
        }
        let initial_state = self
            .initial_state
            .ok_or_else(|| DefinitionError::UnknownInitialState(String::new()))?;
        if !self.states.iter().any(|s| *s == initial_state) {
            return Err(DefinitionError::UnknownInitialState(initial_state.to_string()));
        }
        for fs in &self.final_states {
            if !self.states.iter().any(|s| s == fs) {
                return Err(DefinitionError::UnknownFinalState(fs.to_string()));
            }
        }
        for t in &self.transitions {
            if !self.states.iter().any(|s| *s == t.from) {
                return Err(DefinitionError::UnknownTransitionState(t.from.to_string()));
            }
            if !self.states.iter().any(|s| *s == t.to) {
                return Err(DefinitionError::UnknownTransitionState(t.to.to_string()));
            }
        }

        Ok(FsmDefinition {
            name: self.name,
            match_strategy: self.match_strategy,
            states: self.states,
            initial_state,
            final_states: self.final_states,
            state_configs: self.state_configs,
            transitions: self.transitions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_initial_state() {
        let err = FsmDefinitionBuilder::new("switch", MatchStrategy::ByValue)
            .state("Off")
            .initial("On")
            .build()
            .unwrap_err();
        assert_eq!(err, DefinitionError::UnknownInitialState("On".to_string()));
    }

    #[test]
    fn rejects_empty_definition() {
        let err = FsmDefinitionBuilder::new("empty", MatchStrategy::ByValue)
            .build()
            .unwrap_err();
        assert_eq!(err, DefinitionError::NoStates);
    }

    #[test]
    fn builds_minimal_definition() {
        let def = FsmDefinitionBuilder::new("switch", MatchStrategy::ByValue)
            .state("Off")
            .state("On")
            .initial("Off")
            .on_event("Off", "Press", "On")
            .on_event("On", "Press", "Off")
            .build()
            .unwrap();
        assert_eq!(def.initial_state().as_ref(), "Off");
        assert_eq!(def.transitions_from("Off").count(), 1);
    }
}
