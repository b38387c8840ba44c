//! # Runtime
//!
//! The moving parts of a sliceworks process: behavior registration and job
//! submission, the worker claim/execute loop, the server that owns a worker
//! pool and heartbeats for it, and the supervisor that wires in signals and
//! zombie recovery.

pub mod commands;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod supervisor;
pub mod worker;

pub use commands::{CommandEnvelope, CommandFilter, ServerCommand};
pub use registry::{BehaviorRegistry, JobBehavior};
pub use server::Server;
pub use shutdown::Shutdown;
pub use supervisor::{reap_zombies, Supervisor};
pub use worker::Worker;
