//! Event representation and match strategies
//!
//! Business event schemas (e.g. an `IncomingCall` payload) are external to
//! this crate; what the engine needs is a stable discriminator it can match
//! transitions against. [`Event`] is a tagged variant: a string `tag` plus an
//! opaque `payload`, modelled on the "polymorphic event matching" design note
//! — callers choose whether a definition matches by value (the tag *is* the
//! value, e.g. `"Answer"`) or by class (the tag names a payload's class, e.g.
//! `"IncomingCall"` regardless of which phone number it carries).

use std::fmt;
use std::sync::Arc;

/// An event delivered to an [`crate::fsm::engine::FsmEngine`].
///
/// `payload` is opaque to the engine; actions and guards downcast it via
/// [`Event::payload`] if they need the data it carries.
#[derive(Clone)]
pub struct Event {
    tag: Arc<str>,
    payload: Arc<dyn std::any::Any + Send + Sync>,
}

impl Event {
    /// Build an event with no payload beyond its tag.
    pub fn tagged(tag: impl Into<Arc<str>>) -> Self {
        Self {
            tag: tag.into(),
            payload: Arc::new(()),
        }
    }

    /// Build an event carrying a typed payload.
    pub fn with_payload<T: Send + Sync + 'static>(tag: impl Into<Arc<str>>, payload: T) -> Self {
        Self {
            tag: tag.into(),
            payload: Arc::new(payload),
        }
    }

    /// The event's discriminator, used for both by-value and by-class matching.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Downcast the event's payload.
    pub fn payload<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").field("tag", &self.tag).finish()
    }
}

/// How a definition's transitions match incoming events.
///
/// Mixed strategies within one definition are forbidden by spec: a
/// definition picks one discriminator and every transition's `event_match`
/// is interpreted under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// The transition's event key must equal the event's tag exactly.
    ByValue,
    /// The transition's event key must equal the event's class/tag prefix.
    ByClass,
}
