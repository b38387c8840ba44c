//! Continuous recurrence: every finished run schedules a fresh copy.

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::models::Job;
use crate::state_machine::{JobEvent, JobState};

use super::{JobPolicy, PolicyContext};

/// Inserts a [`Job::copy_for_restart`] whenever a run reaches a terminal
/// state, keeping exactly one instance of the job type cycling. A terminal
/// failure (retries exhausted) is escalated to aborted so the failed run
/// stays inspectable while the copy carries on.
///
/// Register either this policy or [`CronPolicy`], not both; cron recurrence
/// already creates its own copies.
///
/// [`CronPolicy`]: super::CronPolicy
#[derive(Debug, Default)]
pub struct RestartPolicy;

async fn insert_copy(ctx: &PolicyContext, job: &Job) -> Result<()> {
    let copy = job.copy_for_restart();
    info!(
        job_id = %job.id,
        copy_id = %copy.id,
        job_type = %job.job_type,
        "scheduled restart copy"
    );
    ctx.store.insert_job(copy).await
}

#[async_trait]
impl JobPolicy for RestartPolicy {
    fn name(&self) -> &'static str {
        "restart"
    }

    async fn after_complete(&self, ctx: &PolicyContext, job: &mut Job) -> Result<()> {
        insert_copy(ctx, job).await
    }

    async fn after_fail(&self, ctx: &PolicyContext, job: &mut Job) -> Result<()> {
        // Requeued by a retry policy earlier in the set; this run continues.
        if job.state != JobState::Failed {
            return Ok(());
        }
        job.fire(JobEvent::Abort)?;
        insert_copy(ctx, job).await
    }

    async fn after_abort(&self, ctx: &PolicyContext, job: &mut Job) -> Result<()> {
        insert_copy(ctx, job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobException;
    use crate::policies::test_support::context;
    use crate::store::JobStore;

    #[tokio::test]
    async fn completion_schedules_a_copy() {
        let ctx = context();
        let mut job = Job::new("imports::invoices");
        job.priority = 7;
        job.fire(JobEvent::Start).unwrap();
        job.fire(JobEvent::Complete).unwrap();

        RestartPolicy.after_complete(&ctx, &mut job).await.unwrap();

        let queued = ctx
            .store
            .jobs_with_states(&[JobState::Queued])
            .await
            .unwrap();
        assert_eq!(queued.len(), 1);
        assert_ne!(queued[0].id, job.id);
        assert_eq!(queued[0].priority, 7);
        assert_eq!(queued[0].failure_count, 0);
    }

    #[tokio::test]
    async fn terminal_failure_becomes_abort_plus_copy() {
        let ctx = context();
        let mut job = Job::new("imports::invoices");
        job.fire(JobEvent::Start).unwrap();
        job.fail_with(JobException::new("Timeout", "boom")).unwrap();

        RestartPolicy.after_fail(&ctx, &mut job).await.unwrap();
        assert_eq!(job.state, JobState::Aborted);

        let queued = ctx
            .store
            .jobs_with_states(&[JobState::Queued])
            .await
            .unwrap();
        assert_eq!(queued.len(), 1);
    }

    #[tokio::test]
    async fn requeued_failure_is_left_alone() {
        let ctx = context();
        let mut job = Job::new("imports::invoices");
        job.fire(JobEvent::Start).unwrap();
        job.fail_with(JobException::new("Timeout", "boom")).unwrap();
        job.fire(JobEvent::Retry).unwrap();

        RestartPolicy.after_fail(&ctx, &mut job).await.unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert!(ctx
            .store
            .jobs_with_states(&[JobState::Queued])
            .await
            .unwrap()
            .is_empty());
    }
}
