//! # Data Model
//!
//! Plain typed structs for the persisted entities: [`Job`], [`Slice`],
//! [`Category`], and [`ServerRecord`] with its embedded [`Heartbeat`].
//! Persistence mapping lives behind the storage port in [`crate::store`],
//! not on the domain types themselves.

pub mod category;
pub mod job;
pub mod server;
pub mod slice;

pub use category::{Category, Direction, RecordFormat, Serializer};
pub use job::{Job, JobException};
pub use server::{Heartbeat, ServerRecord};
pub use slice::Slice;

/// One opaque unit of input/output data inside a slice.
pub type Record = serde_json::Value;
