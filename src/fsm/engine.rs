//! The generic FSM engine: transition selection, action ordering, timers.

use std::sync::Arc;

use crate::fsm::definition::{ActionError, ContextData, FsmDefinition, StateId, Trigger};
use crate::fsm::event::{Event, MatchStrategy};

/// Errors raised by [`FsmEngine`] operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// `process`/`update` called before `init`.
    #[error("engine not initialized")]
    NotInitialized,
    /// No transition matched the current state and event.
    #[error("no transition from state {state:?} for event {event_tag:?}")]
    NoTransition { state: String, event_tag: String },
    /// A guard/action/hook returned an error; the transition was rolled back.
    #[error("action failed: {0}")]
    ActionFailed(#[from] ActionError),
}

/// Synthetic event tag passed to a state's timeout guard/action. Timeouts
/// carry no external payload of their own.
pub const TIMEOUT_EVENT_TAG: &str = "__timeout__";

/// A live FSM instance bound to one [`FsmDefinition`].
///
/// No wall-clock is ever read here: `update()` advances the engine's own
/// tick counter by exactly one, so tests can drive timers deterministically.
pub struct FsmEngine {
    definition: Arc<FsmDefinition>,
    current_state: Option<StateId>,
    context: ContextData,
    /// Tick at which the current state was entered.
    entry_epoch: u64,
    /// Ticks elapsed since engine construction (not since state entry).
    clock: u64,
    timeout_fired: bool,
}

impl FsmEngine {
    /// Construct an uninitialized engine. Call [`FsmEngine::init`] before
    /// delivering events.
    pub fn new(definition: Arc<FsmDefinition>, context: ContextData) -> Self {
        Self {
            definition,
            current_state: None,
            context,
            entry_epoch: 0,
            clock: 0,
            timeout_fired: false,
        }
    }

    pub fn definition(&self) -> &Arc<FsmDefinition> {
        &self.definition
    }

    /// Enter the definition's initial state, running its `on_entry` hook.
    pub fn init(&mut self) -> Result<(), EngineError> {
        let initial = self.definition.initial_state().clone();
        self.enter_state(&initial)
    }

    /// Force-enter `state`, re-running `on_entry` and resetting the timer.
    /// For rehydration/recovery only.
    pub fn set_state(&mut self, state: &str) -> Result<(), EngineError> {
        let state: StateId = Arc::from(state);
        self.enter_state(&state)
    }

    fn enter_state(&mut self, state: &StateId) -> Result<(), EngineError> {
        self.current_state = Some(state.clone());
        self.entry_epoch = self.clock;
        self.timeout_fired = false;
        if let Some(cfg) = self.definition.state_config(state) {
            if let Some(hook) = &cfg.on_entry {
                hook(&mut self.context)?;
            }
        }
        Ok(())
    }

    /// Select and run the first matching transition for `event`.
    ///
    /// Action ordering: `on_exit(from)` -> `action(event)` -> `on_entry(to)`
    /// (all against a scratch context) -> state swap -> `entry_epoch := now`
    /// -> commit. `on_entry` runs before anything is committed to `self`, so
    /// if any hook/action errors, `current_state`, `entry_epoch`, and
    /// `context` are all left exactly as they were before the call.
    pub fn process(&mut self, event: &Event) -> Result<(), EngineError> {
        let current = self.current_state.clone().ok_or(EngineError::NotInitialized)?;

        let strategy = self.definition.match_strategy();
        let transition = self
            .definition
            .transitions_from(&current)
            .find(|t| {
                let trigger_matches = match &t.trigger {
                    Trigger::Event(key) => matches_event(strategy, key, event),
                    Trigger::Timeout => false,
                };
                trigger_matches && t.guard.as_ref().map_or(true, |g| g(event, &self.context))
            })
            .cloned();

        let transition = transition.ok_or_else(|| EngineError::NoTransition {
            state: current.to_string(),
            event_tag: event.tag().to_string(),
        })?;

        self.run_transition(&current, &transition, event)
    }

    /// Advance the timer for the current state by one tick.
    ///
    /// Runs `on_tick` (if configured) unconditionally, then fires the
    /// state's timeout transition exactly once if `duration >= timeout_after`.
    pub fn update(&mut self) -> Result<(), EngineError> {
        let current = self.current_state.clone().ok_or(EngineError::NotInitialized)?;
        self.clock += 1;
        let duration = self.duration();

        let (on_tick, timeout_after) = match self.definition.state_config(&current) {
            Some(cfg) => (cfg.on_tick.clone(), cfg.timeout_after),
            None => (None, None),
        };

        if let Some(tick_hook) = on_tick {
            tick_hook(&mut self.context, duration)?;
        }

        if !self.timeout_fired {
            if let Some(timeout_after) = timeout_after {
                if duration >= timeout_after {
                    let timeout_event = Event::tagged(TIMEOUT_EVENT_TAG);
                    let transition = self
                        .definition
                        .transitions_from(&current)
                        .find(|t| {
                            matches!(t.trigger, Trigger::Timeout)
                                && t.guard
                                    .as_ref()
                                    .map_or(true, |g| g(&timeout_event, &self.context))
                        })
                        .cloned();
                    if let Some(transition) = transition {
                        self.timeout_fired = true;
                        self.run_transition(&current, &transition, &timeout_event)?;
                    }
                }
            }
        }

        Ok(())
    }

    fn run_transition(
        &mut self,
        from: &StateId,
        transition: &crate::fsm::definition::TransitionDef,
        event: &Event,
    ) -> Result<(), EngineError> {
        let mut scratch = self.context.clone();

        if !transition.stay {
            if let Some(cfg) = self.definition.state_config(from) {
                if let Some(hook) = &cfg.on_exit {
                    hook(&mut scratch)?;
                }
            }
        }

        if let Some(action) = &transition.action {
            action(event, &mut scratch)?;
        }

        if transition.stay {
            self.context = scratch;
            return Ok(());
        }

        if let Some(cfg) = self.definition.state_config(&transition.to) {
            if let Some(hook) = &cfg.on_entry {
                hook(&mut scratch)?;
            }
        }

        // Nothing below can fail: commit only once on_exit, action, and
        // on_entry have all succeeded against `scratch`, so an error from
        // any of them leaves `self` exactly as it was before this call.
        self.context = scratch;
        self.current_state = Some(transition.to.clone());
        self.entry_epoch = self.clock;
        self.timeout_fired = false;

        Ok(())
    }

    pub fn is_terminated(&self) -> bool {
        self.current_state
            .as_deref()
            .is_some_and(|s| self.definition.is_final(s))
    }

    /// Alias for [`FsmEngine::is_terminated`] matching spec terminology.
    pub fn is_complete(&self) -> bool {
        self.is_terminated()
    }

    pub fn current_state(&self) -> Option<&str> {
        self.current_state.as_deref()
    }

    /// Ticks elapsed since entering the current state.
    pub fn duration(&self) -> u64 {
        self.clock.saturating_sub(self.entry_epoch)
    }

    pub fn context(&self) -> &ContextData {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ContextData {
        &mut self.context
    }

    pub fn set_context(&mut self, context: ContextData) {
        self.context = context;
    }
}

fn matches_event(strategy: MatchStrategy, key: &str, event: &Event) -> bool {
    match strategy {
        // Both strategies compare the transition's key against the event's
        // tag; the distinction is in how callers choose tags: an exact value
        // ("Answer") for by-value machines, a payload class name
        // ("IncomingCall") for by-class ones. The engine's job is only to
        // forbid mixing the two within a single definition, which the
        // builder enforces by construction (one `MatchStrategy` per
        // `FsmDefinition`).
        MatchStrategy::ByValue | MatchStrategy::ByClass => key == event.tag(),
    }
}
