//! In-process reference backend for the storage port.
//!
//! Collections live behind `parking_lot` mutexes so every conditional update
//! in the port contract is genuinely atomic: a claim observes, mutates, and
//! publishes under one lock, exactly as a document store's find-and-modify
//! would. Nothing here is awaited while a lock is held.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SliceworksError};
use crate::models::{Heartbeat, Job, ServerRecord, Slice};
use crate::state_machine::{JobState, ServerState, SliceState};

use super::{CollectionId, InsertOutcome, JobStore, ServerStore, SliceStoreBackend};

/// In-memory store: the sole source of truth for a single-process
/// deployment, and the backend integration tests run against.
#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    servers: Mutex<HashMap<String, ServerRecord>>,
    slices: Mutex<HashMap<CollectionId, BTreeMap<u64, Slice>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&job.id) {
            return Err(SliceworksError::Validation(format!(
                "job {} already exists",
                job.id
            )));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.lock().get(&id).cloned())
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.lock();
        if !jobs.contains_key(&job.id) {
            return Err(SliceworksError::Infrastructure(format!(
                "job {} vanished from the store",
                job.id
            )));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update_job_if_state(&self, expected: JobState, job: &Job) -> Result<Option<Job>> {
        let mut jobs = self.jobs.lock();
        match jobs.get(&job.id) {
            Some(stored) if stored.state == expected => {
                jobs.insert(job.id, job.clone());
                Ok(Some(job.clone()))
            }
            Some(_) | None => Ok(None),
        }
    }

    async fn claim_next_job(&self, worker_name: &str, now: DateTime<Utc>) -> Result<Option<Job>> {
        let mut jobs = self.jobs.lock();

        let candidate = jobs
            .values()
            .filter(|job| job.is_claimable(now))
            .min_by_key(|job| (job.priority, job.run_at.unwrap_or(job.created_at), job.created_at))
            .map(|job| job.id);

        let Some(id) = candidate else {
            return Ok(None);
        };

        // Entry is present: we hold the lock that guards the map.
        let job = jobs.get_mut(&id).ok_or_else(|| {
            SliceworksError::Infrastructure("claimed job vanished mid-update".into())
        })?;
        job.fire(crate::state_machine::JobEvent::Start)?;
        job.worker_name = Some(worker_name.to_string());
        Ok(Some(job.clone()))
    }

    async fn release_job(
        &self,
        id: Uuid,
        worker_name: &str,
        run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock();
        if let Some(job) = jobs.get_mut(&id) {
            if job.state == JobState::Running && job.worker_name.as_deref() == Some(worker_name) {
                job.state = JobState::Queued;
                job.worker_name = None;
                job.started_at = None;
                job.run_at = run_at;
            }
        }
        Ok(())
    }

    async fn delete_job(&self, id: Uuid) -> Result<()> {
        self.jobs.lock().remove(&id);
        Ok(())
    }

    async fn jobs_with_states(&self, states: &[JobState]) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .lock()
            .values()
            .filter(|job| states.contains(&job.state))
            .cloned()
            .collect())
    }

    async fn active_count_of_type(
        &self,
        job_type: &str,
        excluding: Option<Uuid>,
    ) -> Result<usize> {
        Ok(self
            .jobs
            .lock()
            .values()
            .filter(|job| {
                job.job_type == job_type
                    && job.state.is_active()
                    && Some(job.id) != excluding
            })
            .count())
    }

    async fn any_running_of_types(&self, job_types: &[String]) -> Result<bool> {
        Ok(self.jobs.lock().values().any(|job| {
            job.state == JobState::Running && job_types.contains(&job.job_type)
        }))
    }

    async fn requeue_running_jobs(&self, worker_prefix: &str) -> Result<usize> {
        let mut jobs = self.jobs.lock();
        let mut requeued = 0;
        for job in jobs.values_mut() {
            let held_by_dead_worker = job.state == JobState::Running
                && job
                    .worker_name
                    .as_deref()
                    .is_some_and(|name| name.starts_with(worker_prefix));
            if held_by_dead_worker {
                job.state = JobState::Queued;
                job.worker_name = None;
                job.started_at = None;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn job_counts_by_state(&self) -> Result<HashMap<JobState, usize>> {
        let mut counts = HashMap::new();
        for job in self.jobs.lock().values() {
            *counts.entry(job.state).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[async_trait]
impl ServerStore for MemoryStore {
    async fn upsert_server(&self, server: &ServerRecord) -> Result<()> {
        self.servers
            .lock()
            .insert(server.name.clone(), server.clone());
        Ok(())
    }

    async fn write_heartbeat(&self, name: &str, heartbeat: Heartbeat) -> Result<()> {
        let mut servers = self.servers.lock();
        match servers.get_mut(name) {
            Some(server) => {
                server.heartbeat = Some(heartbeat);
                Ok(())
            }
            None => Err(SliceworksError::Infrastructure(format!(
                "server record '{name}' vanished; cannot heartbeat"
            ))),
        }
    }

    async fn update_server_state(&self, name: &str, state: ServerState) -> Result<()> {
        let mut servers = self.servers.lock();
        match servers.get_mut(name) {
            Some(server) => {
                server.state = state;
                Ok(())
            }
            None => Err(SliceworksError::Infrastructure(format!(
                "server record '{name}' vanished; cannot update state"
            ))),
        }
    }

    async fn servers(&self) -> Result<Vec<ServerRecord>> {
        Ok(self.servers.lock().values().cloned().collect())
    }

    async fn delete_server(&self, name: &str) -> Result<()> {
        self.servers.lock().remove(name);
        Ok(())
    }
}

#[async_trait]
impl SliceStoreBackend for MemoryStore {
    async fn insert_slice(&self, collection: &CollectionId, slice: Slice) -> Result<InsertOutcome> {
        let mut slices = self.slices.lock();
        let entries = slices.entry(collection.clone()).or_default();
        if entries.contains_key(&slice.id) {
            return Ok(InsertOutcome::Duplicate);
        }
        entries.insert(slice.id, slice);
        Ok(InsertOutcome::Inserted)
    }

    async fn claim_next_slice(
        &self,
        collection: &CollectionId,
        worker_name: &str,
    ) -> Result<Option<Slice>> {
        let mut slices = self.slices.lock();
        let Some(entries) = slices.get_mut(collection) else {
            return Ok(None);
        };

        // BTreeMap iterates in ascending id order: FIFO with respect to id.
        let candidate = entries
            .values()
            .find(|slice| slice.state == SliceState::Queued)
            .map(|slice| slice.id);

        let Some(id) = candidate else {
            return Ok(None);
        };

        let slice = entries.get_mut(&id).ok_or_else(|| {
            SliceworksError::Infrastructure("claimed slice vanished mid-update".into())
        })?;
        slice.start(worker_name)?;
        Ok(Some(slice.clone()))
    }

    async fn update_slice(&self, collection: &CollectionId, slice: &Slice) -> Result<()> {
        let mut slices = self.slices.lock();
        let entries = slices.get_mut(collection).ok_or_else(|| {
            SliceworksError::Infrastructure(format!("collection '{collection}' vanished"))
        })?;
        entries.insert(slice.id, slice.clone());
        Ok(())
    }

    async fn slices(&self, collection: &CollectionId) -> Result<Vec<Slice>> {
        Ok(self
            .slices
            .lock()
            .get(collection)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn slice_counts_by_state(
        &self,
        collection: &CollectionId,
    ) -> Result<HashMap<SliceState, usize>> {
        let mut counts = HashMap::new();
        if let Some(entries) = self.slices.lock().get(collection) {
            for slice in entries.values() {
                *counts.entry(slice.state).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn requeue_failed_slices(&self, collection: &CollectionId) -> Result<usize> {
        let mut slices = self.slices.lock();
        let Some(entries) = slices.get_mut(collection) else {
            return Ok(0);
        };
        let mut requeued = 0;
        for slice in entries.values_mut() {
            if slice.state == SliceState::Failed {
                slice.fire(crate::state_machine::SliceEvent::Retry)?;
                slice.worker_name = None;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn requeue_running_slices(&self, worker_prefix: &str) -> Result<usize> {
        let mut slices = self.slices.lock();
        let mut requeued = 0;
        for entries in slices.values_mut() {
            for slice in entries.values_mut() {
                let held_by_dead_worker = slice.state == SliceState::Running
                    && slice
                        .worker_name
                        .as_deref()
                        .is_some_and(|name| name.starts_with(worker_prefix));
                if held_by_dead_worker {
                    // Repair, not a lifecycle event: the owning worker is
                    // gone, so reset the claim stamps directly.
                    slice.state = SliceState::Queued;
                    slice.worker_name = None;
                    slice.started_at = None;
                    requeued += 1;
                }
            }
        }
        if requeued > 0 {
            debug!(worker_prefix = %worker_prefix, requeued, "requeued in-flight slices");
        }
        Ok(requeued)
    }

    async fn drop_collection(&self, collection: &CollectionId) -> Result<()> {
        self.slices.lock().remove(collection);
        Ok(())
    }

    async fn max_slice_id(&self, collection: &CollectionId) -> Result<u64> {
        Ok(self
            .slices
            .lock()
            .get(collection)
            .and_then(|entries| entries.keys().next_back().copied())
            .unwrap_or(0))
    }

    async fn collections_for_job(&self, job_id: Uuid) -> Result<Vec<CollectionId>> {
        Ok(self
            .slices
            .lock()
            .keys()
            .filter(|collection| collection.job_id == job_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::models::Record;

    fn slice(id: u64) -> Slice {
        Slice::build(id, (id - 1) * 2 + 1, vec![Record::from("r")], &Codec::plain()).unwrap()
    }

    #[tokio::test]
    async fn slice_claims_are_fifo_by_id() {
        let store = MemoryStore::new();
        let collection = CollectionId::input(Uuid::new_v4(), "main");

        for id in [3, 1, 2] {
            store.insert_slice(&collection, slice(id)).await.unwrap();
        }

        let first = store.claim_next_slice(&collection, "w1").await.unwrap().unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(first.state, SliceState::Running);
        assert_eq!(first.worker_name.as_deref(), Some("w1"));
        assert!(first.started_at.is_some());

        let second = store.claim_next_slice(&collection, "w2").await.unwrap().unwrap();
        assert_eq!(second.id, 2);
    }

    #[tokio::test]
    async fn duplicate_slice_insert_is_a_no_op() {
        let store = MemoryStore::new();
        let collection = CollectionId::input(Uuid::new_v4(), "main");

        assert_eq!(
            store.insert_slice(&collection, slice(1)).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_slice(&collection, slice(1)).await.unwrap(),
            InsertOutcome::Duplicate
        );
        assert_eq!(store.slices(&collection).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_claims_never_hand_out_the_same_slice() {
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        let collection = CollectionId::input(Uuid::new_v4(), "main");
        for id in 1..=20 {
            store.insert_slice(&collection, slice(id)).await.unwrap();
        }

        let mut handles = Vec::new();
        for worker in 0..4 {
            let store = Arc::clone(&store);
            let collection = collection.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(slice) = store
                    .claim_next_slice(&collection, &format!("w{worker}"))
                    .await
                    .unwrap()
                {
                    claimed.push(slice.id);
                }
                claimed
            }));
        }

        let mut all: Vec<u64> = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn job_claim_orders_by_priority_then_run_at() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let mut urgent = Job::new("worker::a");
        urgent.priority = 1;
        let mut relaxed = Job::new("worker::b");
        relaxed.priority = 90;
        let mut future = Job::new("worker::c");
        future.priority = 0;
        future.run_at = Some(now + chrono::Duration::hours(1));

        let urgent_id = urgent.id;
        store.insert_job(relaxed).await.unwrap();
        store.insert_job(urgent).await.unwrap();
        store.insert_job(future).await.unwrap();

        let claimed = store.claim_next_job("w1", now).await.unwrap().unwrap();
        assert_eq!(claimed.id, urgent_id);
        assert_eq!(claimed.state, JobState::Running);
        assert_eq!(claimed.worker_name.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn conditional_job_update_detects_lost_race() {
        let store = MemoryStore::new();
        let job = Job::new("worker::a");
        store.insert_job(job.clone()).await.unwrap();

        // Another process aborted it meanwhile.
        let mut aborted = job.clone();
        aborted.state = JobState::Aborted;
        store.update_job(&aborted).await.unwrap();

        let mut ours = job.clone();
        ours.state = JobState::Running;
        let outcome = store
            .update_job_if_state(JobState::Queued, &ours)
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn counts_group_by_state() {
        let store = MemoryStore::new();

        let queued = Job::new("worker::a");
        let mut running = Job::new("worker::a");
        running.fire(crate::state_machine::JobEvent::Start).unwrap();
        store.insert_job(queued).await.unwrap();
        store.insert_job(running).await.unwrap();

        let counts = store.job_counts_by_state().await.unwrap();
        assert_eq!(counts.get(&JobState::Queued), Some(&1));
        assert_eq!(counts.get(&JobState::Running), Some(&1));
        assert_eq!(counts.get(&JobState::Failed), None);

        assert_eq!(store.active_count_of_type("worker::a", None).await.unwrap(), 2);
        assert!(store
            .any_running_of_types(&["worker::a".to_string()])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn requeue_running_matches_worker_prefix() {
        let store = MemoryStore::new();
        let collection = CollectionId::input(Uuid::new_v4(), "main");
        for id in 1..=3 {
            store.insert_slice(&collection, slice(id)).await.unwrap();
        }

        store
            .claim_next_slice(&collection, "dead-host:11:0")
            .await
            .unwrap();
        store
            .claim_next_slice(&collection, "live-host:22:0")
            .await
            .unwrap();

        let requeued = store.requeue_running_slices("dead-host:11").await.unwrap();
        assert_eq!(requeued, 1);

        let counts = store.slice_counts_by_state(&collection).await.unwrap();
        assert_eq!(counts.get(&SliceState::Queued), Some(&2));
        assert_eq!(counts.get(&SliceState::Running), Some(&1));
    }
}
