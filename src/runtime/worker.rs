//! Worker loop: claim a job, gate it through its policies, and run it to a
//! terminal state one slice at a time.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::codec::Codec;
use crate::config::SliceworksConfig;
use crate::error::{Result, SliceworksError};
use crate::models::category::{Category, MAIN_CATEGORY};
use crate::models::{Job, JobException, Slice};
use crate::policies::{PolicyContext, PolicySet, RunDecision, StartDecision};
use crate::slices::SliceStore;
use crate::state_machine::{JobEvent, SliceState};
use crate::store::{CollectionId, Store};

use super::registry::{BehaviorRegistry, JobBehavior};
use super::shutdown::Shutdown;

/// One claim/execute loop. A server owns `max_workers` of these, each
/// running as its own task; all cross-worker coordination goes through the
/// store's atomic claims, never through shared memory.
pub struct Worker {
    name: String,
    store: Arc<dyn Store>,
    config: SliceworksConfig,
    registry: Arc<BehaviorRegistry>,
    shutdown: Shutdown,
    status: Arc<Mutex<String>>,
}

impl Worker {
    pub fn new(
        name: String,
        store: Arc<dyn Store>,
        config: SliceworksConfig,
        registry: Arc<BehaviorRegistry>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            name,
            store,
            config,
            registry,
            shutdown,
            status: Arc::new(Mutex::new("idle".to_string())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Live diagnostic line for thread dumps.
    pub fn status_handle(&self) -> Arc<Mutex<String>> {
        Arc::clone(&self.status)
    }

    /// Poll for work until shutdown. The first poll is optionally staggered
    /// so a full pool does not hit the store in lockstep at startup.
    pub async fn run(self) {
        if self.config.server.stagger_first_poll {
            let max_millis = self.config.poll_interval().as_millis().max(1) as u64;
            let stagger = {
                use rand::Rng;
                rand::thread_rng().gen_range(0..max_millis)
            };
            if self
                .shutdown
                .sleep_interruptible(std::time::Duration::from_millis(stagger))
                .await
            {
                return;
            }
        }

        info!(worker = %self.name, "worker started");
        while !self.shutdown.is_triggered() {
            match self.run_one().await {
                Ok(true) => continue,
                Ok(false) => {
                    if self
                        .shutdown
                        .sleep_interruptible(self.config.poll_interval())
                        .await
                    {
                        break;
                    }
                }
                Err(e) if e.is_claim_conflict() => {
                    debug!(worker = %self.name, error = %e, "lost a claim race");
                }
                Err(e) => {
                    error!(worker = %self.name, error = %e, "worker iteration failed");
                    if self
                        .shutdown
                        .sleep_interruptible(self.config.poll_interval())
                        .await
                    {
                        break;
                    }
                }
            }
        }
        *self.status.lock() = "stopped".to_string();
        info!(worker = %self.name, "worker stopped");
    }

    /// Claim and run at most one job. Returns whether a job was claimed.
    pub(crate) async fn run_one(&self) -> Result<bool> {
        let Some(mut job) = self.store.claim_next_job(&self.name, Utc::now()).await? else {
            return Ok(false);
        };
        *self.status.lock() = format!("job {} ({})", job.id, job.job_type);

        let result = self.run_claimed(&mut job).await;
        *self.status.lock() = "idle".to_string();
        result?;
        Ok(true)
    }

    async fn run_claimed(&self, job: &mut Job) -> Result<()> {
        let Some(behavior) = self.registry.behavior(&job.job_type) else {
            let exception = JobException::new(
                "UnknownJobType",
                format!("no behavior registered for '{}'", job.job_type),
            )
            .with_worker(&self.name);
            job.fail_with(exception)?;
            return self.store.update_job(job).await;
        };
        let policies = self
            .registry
            .policies(&job.job_type)
            .unwrap_or_else(|| Arc::new(PolicySet::new()));

        let ctx = self.policy_context();
        if let StartDecision::Defer { run_at, reason } = policies.before_start(&ctx, job).await? {
            info!(
                worker = %self.name,
                job_id = %job.id,
                job_type = %job.job_type,
                reason = %reason,
                "start deferred; releasing claim"
            );
            return self.store.release_job(job.id, &self.name, run_at).await;
        }

        if job.is_batch() {
            self.run_batch(job, behavior.as_ref(), &policies).await
        } else {
            self.run_simple(job, behavior.as_ref(), &policies).await
        }
    }

    async fn run_simple(
        &self,
        job: &mut Job,
        behavior: &dyn JobBehavior,
        policies: &PolicySet,
    ) -> Result<()> {
        match behavior.perform(job).await {
            Ok(()) => {
                job.fire(JobEvent::Complete)?;
                let ctx = self.policy_context();
                policies.after_complete(&ctx, job).await?;
                info!(
                    worker = %self.name,
                    job_id = %job.id,
                    job_type = %job.job_type,
                    seconds = ?job.duration(Utc::now()).map(|d| d.num_seconds()),
                    "job completed"
                );
            }
            Err(e) => {
                warn!(worker = %self.name, job_id = %job.id, error = %e, "job failed");
                job.fail_with(self.exception_from(&e))?;
                let ctx = self.policy_context();
                policies.after_fail(&ctx, job).await?;
            }
        }
        self.store.update_job(job).await
    }

    async fn run_batch(
        &self,
        job: &mut Job,
        behavior: &dyn JobBehavior,
        policies: &PolicySet,
    ) -> Result<()> {
        // Guaranteed by Job::validate for batch jobs.
        let input_category = job
            .input_category(MAIN_CATEGORY)
            .cloned()
            .ok_or_else(|| SliceworksError::Validation("batch job lost its main input".into()))?;
        let input = self.open_store(job, &input_category).await?;
        let input_codec = input.codec().clone();

        let output = match job.output_category(MAIN_CATEGORY).cloned() {
            Some(category) => Some(self.open_store(job, &category).await?),
            None => None,
        };

        // A requeued job carries its earlier slice failures with it; hand
        // them back for reprocessing so the retry actually retries.
        if job.failure_count > 0 {
            let requeued = input.requeue_failed().await?;
            if requeued > 0 {
                info!(
                    worker = %self.name,
                    job_id = %job.id,
                    requeued_slices = requeued,
                    "requeued failed slices for retry"
                );
            }
        }

        let counts = input.counts_by_state().await?;
        let total: usize = counts.values().sum();
        let mut processed = counts.get(&SliceState::Completed).copied().unwrap_or(0);

        loop {
            if self.shutdown.is_triggered() {
                // Finish between slices, never mid-slice; completed slices
                // are durable so a later run resumes where this one left off.
                info!(worker = %self.name, job_id = %job.id, "shutdown; releasing claimed job");
                return self.store.release_job(job.id, &self.name, None).await;
            }

            let ctx = self.policy_context();
            if let RunDecision::Interrupt { reason, resume_at } =
                policies.while_running(&ctx, job).await?
            {
                info!(
                    worker = %self.name,
                    job_id = %job.id,
                    reason = %reason,
                    resume_at = ?resume_at,
                    "run interrupted; aborting and rescheduling"
                );
                job.fire(JobEvent::Abort)?;
                if resume_at.is_some() {
                    let mut copy = job.copy_for_restart();
                    copy.run_at = resume_at;
                    self.store.insert_job(copy).await?;
                }
                return self.store.update_job(job).await;
            }

            let Some(mut slice) = input.next_slice(&self.name).await? else {
                break;
            };
            self.process_slice(job, behavior, &input, &input_codec, output.as_ref(), &mut slice)
                .await?;

            processed += 1;
            if total > 0 {
                // Hold 100 back for the completion transition.
                job.percent_complete = ((processed * 100 / total) as u8).min(99);
                self.store.update_job(job).await?;
            }
        }

        let counts = input.counts_by_state().await?;
        let failed = counts.get(&SliceState::Failed).copied().unwrap_or(0);
        let ctx = self.policy_context();
        if failed > 0 {
            let exception = JobException::new(
                "SliceProcessingFailed",
                format!("{failed} slices failed; see the input collection for details"),
            )
            .with_worker(&self.name);
            warn!(worker = %self.name, job_id = %job.id, failed_slices = failed, "batch finished with failures");
            job.fail_with(exception)?;
            policies.after_fail(&ctx, job).await?;
        } else {
            job.fire(JobEvent::Complete)?;
            policies.after_complete(&ctx, job).await?;
            self.cleanup_collections(job).await?;
            info!(
                worker = %self.name,
                job_id = %job.id,
                job_type = %job.job_type,
                seconds = ?job.duration(Utc::now()).map(|d| d.num_seconds()),
                "batch job completed"
            );
        }
        self.store.update_job(job).await
    }

    async fn process_slice(
        &self,
        job: &Job,
        behavior: &dyn JobBehavior,
        input: &SliceStore,
        input_codec: &Codec,
        output: Option<&SliceStore>,
        slice: &mut Slice,
    ) -> Result<()> {
        let first_record_number = slice.first_record_number;
        let records = match slice.records(input_codec) {
            Ok(records) => records.to_vec(),
            Err(e) => {
                let exception = self.exception_from(&e).with_worker(&self.name);
                return input.fail_slice(slice, exception).await;
            }
        };

        let mut outputs = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            match behavior.process_record(job, record).await {
                Ok(Some(out)) => outputs.push(out),
                Ok(None) => {}
                Err(e) => {
                    let exception = self
                        .exception_from(&e)
                        .with_worker(&self.name)
                        .with_record_number(first_record_number + index as u64);
                    warn!(
                        worker = %self.name,
                        job_id = %job.id,
                        slice_id = slice.id,
                        record_number = first_record_number + index as u64,
                        error = %e,
                        "slice failed"
                    );
                    return input.fail_slice(slice, exception).await;
                }
            }
        }

        if let Some(output_store) = output {
            // Output slices reuse the input slice's id and numbering so the
            // output collection preserves upload order exactly.
            let out_slice =
                Slice::build(slice.id, first_record_number, outputs, output_store.codec())?;
            output_store.insert(out_slice).await?;
        }
        debug!(
            worker = %self.name,
            slice_id = slice.id,
            records = records.len(),
            seconds = ?slice.processing_seconds(Utc::now()),
            "slice completed"
        );
        input.complete_slice(slice).await
    }

    async fn open_store(&self, job: &Job, category: &Category) -> Result<SliceStore> {
        let codec = Codec::resolve(category.serializer, &self.config.crypto)?;
        let slice_size = category
            .slice_size
            .unwrap_or(self.config.slices.default_slice_size);
        let collection = CollectionId::new(category.direction, job.id, category.name.clone());
        SliceStore::open(Arc::clone(&self.store), collection, codec, slice_size).await
    }

    /// Drop slice collections after successful completion. Inputs are always
    /// consumed; outputs survive when the job asked to retain them.
    async fn cleanup_collections(&self, job: &Job) -> Result<()> {
        for collection in self.store.collections_for_job(job.id).await? {
            let keep = job.retain_completed
                && collection.direction == crate::models::category::Direction::Output;
            if !keep {
                self.store.drop_collection(&collection).await?;
            }
        }
        Ok(())
    }

    fn policy_context(&self) -> PolicyContext {
        PolicyContext::new(Arc::clone(&self.store), self.config.clone())
    }

    fn exception_from(&self, error: &SliceworksError) -> JobException {
        match error {
            SliceworksError::Execution {
                class_name,
                message,
            } => JobException::new(class_name.clone(), message.clone()),
            other => JobException::new("SliceworksError", other.to_string()),
        }
        .with_worker(&self.name)
    }
}
