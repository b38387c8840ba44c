//! # sliceworks
//!
//! Distributed batch-job processing: jobs are split into ordered slices,
//! distributed to pools of workers with exactly-once-claim semantics, and
//! supervised by heartbeating servers that recover each other's work after a
//! crash.
//!
//! The major pieces:
//!
//! - [`models`]: jobs, slices, categories, and server records.
//! - [`state_machine`]: the declarative transition tables driving every
//!   lifecycle change.
//! - [`codec`]: slice payload encodings, from plain MessagePack to
//!   encrypted multi-member bzip2 streams.
//! - [`store`]: the storage port every cross-process coordination goes
//!   through, plus the in-memory reference backend.
//! - [`slices`]: the slice store that turns uploads into claimable slices.
//! - [`policies`]: opt-in lifecycle behaviors (retry, cron, singleton,
//!   throttling, processing windows).
//! - [`runtime`]: workers, servers, and the supervisor.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use sliceworks::config::SliceworksConfig;
//! use sliceworks::models::{Job, Record};
//! use sliceworks::policies::{PolicySet, RetryPolicy};
//! use sliceworks::runtime::{BehaviorRegistry, JobBehavior, Supervisor};
//! use sliceworks::store::MemoryStore;
//!
//! struct Uppercase;
//!
//! #[async_trait]
//! impl JobBehavior for Uppercase {
//!     fn job_type(&self) -> &'static str {
//!         "text::uppercase"
//!     }
//!
//!     async fn process_record(
//!         &self,
//!         _job: &Job,
//!         record: &Record,
//!     ) -> sliceworks::Result<Option<Record>> {
//!         Ok(record.as_str().map(|s| Record::from(s.to_uppercase())))
//!     }
//! }
//!
//! # async fn run() -> sliceworks::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let config = SliceworksConfig::load()?;
//! let registry = Arc::new(BehaviorRegistry::new());
//! registry.register(
//!     Arc::new(Uppercase),
//!     PolicySet::new().with(Arc::new(RetryPolicy)),
//! );
//!
//! Supervisor::new(store, config, registry).run().await
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod policies;
pub mod runtime;
pub mod slices;
pub mod state_machine;
pub mod store;

pub use error::{Result, SliceworksError};
