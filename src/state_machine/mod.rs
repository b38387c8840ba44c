//! # State Machine
//!
//! Generic, declarative finite-state-machine shared by jobs and slices. The
//! transition table is data, not code: each named event carries its
//! `(from, to)` pairs plus ordered `before`/`after` callback lists, which
//! makes the table unit-testable in isolation from any persistence concern.

pub mod errors;
pub mod events;
pub mod machine;
pub mod states;

pub use errors::StateMachineError;
pub use events::{JobEvent, SliceEvent};
pub use machine::{StateMachine, Stateful};
pub use states::{JobState, ServerState, SliceState};
