//! # Storage Port
//!
//! The persistent document store is an external collaborator; the engine
//! only depends on the capabilities defined here: atomic conditional
//! updates that return the post-update value (slice/job claiming,
//! heartbeats), unique-key enforcement (slice dedup), and range/equality
//! queries (zombie scan, singleton checks, next-job selection).
//!
//! All cross-worker and cross-server coordination is expressed through this
//! port — no in-process lock coordinates across processes.

pub mod memory;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::category::Direction;
use crate::models::{Heartbeat, Job, ServerRecord, Slice};
use crate::state_machine::{JobState, ServerState, SliceState};

pub use memory::MemoryStore;

/// Identity of one per-job-per-category slice collection:
/// `{direction}.{job_id}[.{category}]`, category omitted for `main`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionId {
    pub direction: Direction,
    pub job_id: Uuid,
    pub category: String,
}

impl CollectionId {
    pub fn new(direction: Direction, job_id: Uuid, category: impl Into<String>) -> Self {
        Self {
            direction,
            job_id,
            category: category.into(),
        }
    }

    pub fn input(job_id: Uuid, category: impl Into<String>) -> Self {
        Self::new(Direction::Input, job_id, category)
    }

    pub fn output(job_id: Uuid, category: impl Into<String>) -> Self {
        Self::new(Direction::Output, job_id, category)
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.category == crate::models::category::MAIN_CATEGORY {
            write!(f, "{}.{}", self.direction, self.job_id)
        } else {
            write!(f, "{}.{}.{}", self.direction, self.job_id, self.category)
        }
    }
}

/// Outcome of a unique-key insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The key already existed; treated as a benign no-op by callers.
    Duplicate,
}

/// Job persistence operations.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: Job) -> Result<()>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>>;

    /// Unconditional save of an already-claimed job.
    async fn update_job(&self, job: &Job) -> Result<()>;

    /// Atomic conditional update: persist `job` only if the stored record is
    /// still in `expected` state. Returns the post-update value, or `None`
    /// when the race was lost.
    async fn update_job_if_state(&self, expected: JobState, job: &Job) -> Result<Option<Job>>;

    /// Atomically claim the most urgent claimable job: lowest
    /// `(priority, run_at, created_at)` among queued jobs whose `run_at`
    /// has passed. Sets `worker_name` and transitions it to running.
    async fn claim_next_job(&self, worker_name: &str, now: DateTime<Utc>) -> Result<Option<Job>>;

    /// Hand a claimed job back: conditional on the claim still being held,
    /// reset it to queued (clearing worker/start stamps) with an optional
    /// new `run_at`. Used when a policy gate refuses to start a claimed job.
    async fn release_job(&self, id: Uuid, worker_name: &str, run_at: Option<DateTime<Utc>>)
        -> Result<()>;

    async fn delete_job(&self, id: Uuid) -> Result<()>;

    async fn jobs_with_states(&self, states: &[JobState]) -> Result<Vec<Job>>;

    /// Number of jobs of `job_type` in a non-terminal state, optionally
    /// excluding one id (the record being validated).
    async fn active_count_of_type(&self, job_type: &str, excluding: Option<Uuid>)
        -> Result<usize>;

    /// Whether any job of the named types is currently running.
    async fn any_running_of_types(&self, job_types: &[String]) -> Result<bool>;

    /// Reset jobs still marked running under a dead server's workers back to
    /// queued. `worker_prefix` is the server name.
    async fn requeue_running_jobs(&self, worker_prefix: &str) -> Result<usize>;

    async fn job_counts_by_state(&self) -> Result<HashMap<JobState, usize>>;
}

/// Server record persistence operations.
#[async_trait]
pub trait ServerStore: Send + Sync {
    async fn upsert_server(&self, server: &ServerRecord) -> Result<()>;

    /// Refresh the heartbeat embedded in an existing server record.
    async fn write_heartbeat(&self, name: &str, heartbeat: Heartbeat) -> Result<()>;

    async fn update_server_state(&self, name: &str, state: ServerState) -> Result<()>;

    async fn servers(&self) -> Result<Vec<ServerRecord>>;

    async fn delete_server(&self, name: &str) -> Result<()>;
}

/// Slice collection persistence operations.
#[async_trait]
pub trait SliceStoreBackend: Send + Sync {
    /// Unique-key insert; an existing slice id in the collection reports
    /// [`InsertOutcome::Duplicate`] instead of failing.
    async fn insert_slice(&self, collection: &CollectionId, slice: Slice) -> Result<InsertOutcome>;

    /// Atomically claim the lowest-id queued slice: set `worker_name`,
    /// transition to running, stamp `started_at`, all as one update.
    async fn claim_next_slice(
        &self,
        collection: &CollectionId,
        worker_name: &str,
    ) -> Result<Option<Slice>>;

    async fn update_slice(&self, collection: &CollectionId, slice: &Slice) -> Result<()>;

    async fn slices(&self, collection: &CollectionId) -> Result<Vec<Slice>>;

    async fn slice_counts_by_state(
        &self,
        collection: &CollectionId,
    ) -> Result<HashMap<SliceState, usize>>;

    /// Reset all failed slices to queued, clearing worker/start stamps.
    async fn requeue_failed_slices(&self, collection: &CollectionId) -> Result<usize>;

    /// Reset slices still running under workers whose name starts with
    /// `worker_prefix` (a dead server's name), across all collections.
    async fn requeue_running_slices(&self, worker_prefix: &str) -> Result<usize>;

    async fn drop_collection(&self, collection: &CollectionId) -> Result<()>;

    /// Highest slice id in the collection, 0 when empty. Used to continue
    /// id assignment after a partial upload.
    async fn max_slice_id(&self, collection: &CollectionId) -> Result<u64>;

    /// Every collection belonging to `job_id`, for completion cleanup.
    async fn collections_for_job(&self, job_id: Uuid) -> Result<Vec<CollectionId>>;
}

/// Full storage capability required by the runtime.
pub trait Store: JobStore + ServerStore + SliceStoreBackend {}

impl<T: JobStore + ServerStore + SliceStoreBackend> Store for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_follow_the_wire_format() {
        let job_id = Uuid::nil();
        let main = CollectionId::input(job_id, "main");
        assert_eq!(
            main.to_string(),
            format!("inputs.{job_id}"),
        );

        let errors = CollectionId::output(job_id, "errors");
        assert_eq!(
            errors.to_string(),
            format!("outputs.{job_id}.errors"),
        );
    }
}
