//! Generic transition-table engine.
//!
//! A [`StateMachine`] owns a set of named events, each with declared
//! `(from, to)` state pairs and ordered `before`/`after` callback lists.
//! `before` callbacks run pre-persistence and may abort the transition;
//! `after` callbacks run post-persistence and must not abort it, so their
//! failures are logged and swallowed. The machine holds no lock: concurrent
//! firers racing on the same persisted entity are serialized by the store's
//! atomic conditional update.

use tracing::warn;

use super::errors::StateMachineError;

/// An entity whose lifecycle state is driven by a [`StateMachine`].
pub trait Stateful {
    type State: Copy + Eq + std::fmt::Display + std::fmt::Debug + Send + Sync + 'static;

    fn state(&self) -> Self::State;
    fn set_state(&mut self, state: Self::State);
}

type Callback<T> = Box<dyn Fn(&mut T) -> Result<(), StateMachineError> + Send + Sync>;

struct EventDef<T: Stateful> {
    name: String,
    pairs: Vec<(T::State, T::State)>,
    /// Target for a wildcard transition allowed from any state.
    from_any: Option<T::State>,
    before: Vec<Callback<T>>,
    after: Vec<Callback<T>>,
}

impl<T: Stateful> EventDef<T> {
    fn target_from(&self, from: T::State) -> Option<T::State> {
        self.pairs
            .iter()
            .find(|(f, _)| *f == from)
            .map(|(_, to)| *to)
            .or(self.from_any)
    }
}

/// Declarative state machine: states plus named, guarded events.
pub struct StateMachine<T: Stateful> {
    initial: T::State,
    events: Vec<EventDef<T>>,
}

impl<T: Stateful> StateMachine<T> {
    pub fn new(initial: T::State) -> Self {
        Self {
            initial,
            events: Vec::new(),
        }
    }

    /// The state every new entity is created in.
    pub fn initial_state(&self) -> T::State {
        self.initial
    }

    /// Register (or reopen) an event definition for further declaration.
    /// Policies compose by each appending callbacks to the same event.
    pub fn event(&mut self, name: &str) -> EventBuilder<'_, T> {
        let index = match self.events.iter().position(|e| e.name == name) {
            Some(index) => index,
            None => {
                self.events.push(EventDef {
                    name: name.to_string(),
                    pairs: Vec::new(),
                    from_any: None,
                    before: Vec::new(),
                    after: Vec::new(),
                });
                self.events.len() - 1
            }
        };
        EventBuilder {
            def: &mut self.events[index],
        }
    }

    fn event_def(&self, name: &str) -> Result<&EventDef<T>, StateMachineError> {
        self.events
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| StateMachineError::UnknownEvent {
                event: name.to_string(),
            })
    }

    /// Whether `event` may fire from `state`.
    pub fn can_fire(&self, state: T::State, event: &str) -> bool {
        self.event_def(event)
            .map(|def| def.target_from(state).is_some())
            .unwrap_or(false)
    }

    /// The declared target state for `(state, event)`.
    pub fn target_for(&self, state: T::State, event: &str) -> Result<T::State, StateMachineError> {
        let def = self.event_def(event)?;
        def.target_from(state)
            .ok_or_else(|| StateMachineError::InvalidTransition {
                event: event.to_string(),
                from: state.to_string(),
            })
    }

    /// Fire `event` on `entity`: validate the transition, run `before`
    /// callbacks in registration order (any error aborts with the entity's
    /// state untouched), then move the entity to the target state.
    ///
    /// The caller persists the entity and then invokes [`run_after`].
    ///
    /// [`run_after`]: StateMachine::run_after
    pub fn fire(&self, entity: &mut T, event: &str) -> Result<T::State, StateMachineError> {
        let def = self.event_def(event)?;
        let from = entity.state();
        let to = def
            .target_from(from)
            .ok_or_else(|| StateMachineError::InvalidTransition {
                event: event.to_string(),
                from: from.to_string(),
            })?;

        for callback in &def.before {
            callback(entity).map_err(|e| StateMachineError::CallbackFailed {
                event: event.to_string(),
                reason: e.to_string(),
            })?;
        }

        entity.set_state(to);
        Ok(to)
    }

    /// Run `after` callbacks in registration order. The transition has
    /// already been persisted, so failures cannot abort it; they are logged
    /// at warn level and skipped.
    pub fn run_after(&self, entity: &mut T, event: &str) -> Result<(), StateMachineError> {
        let def = self.event_def(event)?;
        for callback in &def.after {
            if let Err(e) = callback(entity) {
                warn!(event = %event, error = %e, "after-callback failed; transition already persisted");
            }
        }
        Ok(())
    }
}

/// Chained declaration for one event.
pub struct EventBuilder<'a, T: Stateful> {
    def: &'a mut EventDef<T>,
}

impl<'a, T: Stateful> EventBuilder<'a, T> {
    /// Declare a `(from, to)` transition pair.
    pub fn transition(self, from: T::State, to: T::State) -> Self {
        self.def.pairs.push((from, to));
        self
    }

    /// Declare a wildcard transition allowed from any state.
    pub fn transition_from_any(self, to: T::State) -> Self {
        self.def.from_any = Some(to);
        self
    }

    /// Append a pre-persistence callback; it may error to abort the event.
    pub fn before<F>(self, callback: F) -> Self
    where
        F: Fn(&mut T) -> Result<(), StateMachineError> + Send + Sync + 'static,
    {
        self.def.before.push(Box::new(callback));
        self
    }

    /// Append a post-persistence callback; its errors never abort the event.
    pub fn after<F>(self, callback: F) -> Self
    where
        F: Fn(&mut T) -> Result<(), StateMachineError> + Send + Sync + 'static,
    {
        self.def.after.push(Box::new(callback));
        self
    }
}
