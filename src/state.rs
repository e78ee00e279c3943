//! Per-connection state machine runtime.
//!
//! Application code implements [`State`] for each state a connection can be
//! in; a [`StateContext`] owns the current state and lets a handler's `set`
//! implementation request a transition without the handler needing to know
//! the concrete state type it is transitioning to.

/// A single state in a connection's state machine.
///
/// `id` is used by the "early guard" idiom: a handler that requires the
/// connection to have reached at least some state checks
/// `context.current_state_id() >= REQUIRED_ID` before doing any work, and
/// returns [`crate::error::ErrorKind::Callback`] otherwise so the dispatcher
/// turns it into a `Reject` acknowledgement.
pub trait State: Send {
    /// Numeric identifier for this state, used by the early-guard idiom.
    /// States reached later in a connection's lifecycle have higher ids.
    fn id(&self) -> u32;

    /// Human-readable name, useful in logs.
    fn name(&self) -> &'static str;

    /// Called by a handler when an event relevant to this state occurs.
    /// Implementations that want to move to a different state call
    /// `context.next_state(...)`. A no-op default lets states that only
    /// exist to be guarded against (and never transition themselves) skip
    /// the boilerplate.
    fn set(&mut self, _context: &mut StateContext, _event: StateEvent) {}
}

/// An event delivered to the current state's [`State::set`]. Kept as a
/// small enum rather than a generic type parameter so `StateContext` does
/// not need to be generic over an event type; application code that needs
/// richer event data can stash it in `Custom` as a boxed value.
pub enum StateEvent {
    /// A control code was dispatched while in this state.
    ControlCode(u64),
    /// Application-defined event, for state transitions triggered by
    /// something other than a single control code (e.g. "both value A and
    /// value B have now arrived").
    Custom(Box<dyn std::any::Any + Send>),
}

/// Owns the current state for one connection and mediates transitions.
///
/// A dispatcher calls [`StateContext::set`] once per dispatched packet; the
/// current state's `set` implementation decides whether to transition.
pub struct StateContext {
    current: Option<Box<dyn State>>,
}

impl StateContext {
    pub fn new(initial: Box<dyn State>) -> StateContext {
        StateContext {
            current: Some(initial),
        }
    }

    /// Deliver `event` to the current state, allowing it to transition.
    pub fn set(&mut self, event: StateEvent) {
        // Take the current state out so `current.set` can be called with a
        // mutable StateContext without aliasing `self.current`. If `set`
        // calls `next_state`, that repopulates `self.current`; otherwise we
        // put the original state back.
        let mut current = self.current.take().expect("state context always holds a state between calls");
        current.set(self, event);
        if self.current.is_none() {
            self.current = Some(current);
        }
    }

    /// Called from within a [`State::set`] implementation to move to a new
    /// state.
    pub fn next_state(&mut self, new_state: Box<dyn State>) {
        self.current = Some(new_state);
    }

    fn current(&self) -> &dyn State {
        self.current
            .as_deref()
            .expect("state context always holds a state between calls")
    }

    pub fn current_state_id(&self) -> u32 {
        self.current().id()
    }

    pub fn current_state_name(&self) -> &'static str {
        self.current().name()
    }
}
