//! Cron-style recurrence driven by the job's own schedule expression.

use async_trait::async_trait;
use tracing::info;

use crate::error::{Result, SliceworksError};
use crate::models::Job;
use crate::state_machine::{JobEvent, JobState};

use super::{next_occurrence, parse_schedule, JobPolicy, PolicyContext};

/// Schedules each run of a job carrying a `cron_schedule` and, when that run
/// finishes, inserts a fresh copy timed for the next occurrence.
///
/// `run_at` is only computed when unset, so a caller may pin an explicit
/// time, or clear it after creation to run immediately; recurrence resumes
/// from the following occurrence either way.
#[derive(Debug, Default)]
pub struct CronPolicy;

async fn schedule_next(ctx: &PolicyContext, job: &Job) -> Result<()> {
    let Some(expression) = job.cron_schedule.as_deref() else {
        return Ok(());
    };
    let schedule = parse_schedule(expression)?;
    let mut copy = job.copy_for_restart();
    copy.run_at = next_occurrence(&schedule, ctx.now);
    info!(
        job_id = %job.id,
        copy_id = %copy.id,
        job_type = %job.job_type,
        run_at = ?copy.run_at,
        "scheduled next cron occurrence"
    );
    ctx.store.insert_job(copy).await
}

#[async_trait]
impl JobPolicy for CronPolicy {
    fn name(&self) -> &'static str {
        "cron"
    }

    async fn on_create(&self, ctx: &PolicyContext, job: &mut Job) -> Result<()> {
        let Some(expression) = job.cron_schedule.as_deref() else {
            return Err(SliceworksError::Validation(format!(
                "job type '{}' uses cron recurrence but has no cron_schedule",
                job.job_type
            )));
        };
        let schedule = parse_schedule(expression)?;
        if job.run_at.is_none() {
            job.run_at = next_occurrence(&schedule, ctx.now);
        }
        Ok(())
    }

    async fn after_complete(&self, ctx: &PolicyContext, job: &mut Job) -> Result<()> {
        schedule_next(ctx, job).await
    }

    async fn after_fail(&self, ctx: &PolicyContext, job: &mut Job) -> Result<()> {
        if job.state != JobState::Failed {
            return Ok(());
        }
        job.fire(JobEvent::Abort)?;
        schedule_next(ctx, job).await
    }

    async fn after_abort(&self, ctx: &PolicyContext, job: &mut Job) -> Result<()> {
        schedule_next(ctx, job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::test_support::context;
    use crate::store::JobStore;
    use chrono::{TimeZone, Utc};

    fn hourly_job() -> Job {
        let mut job = Job::new("reports::hourly");
        job.cron_schedule = Some("0 0 * * * *".into());
        job
    }

    #[tokio::test]
    async fn create_computes_run_at_from_schedule() {
        let ctx = context().at(Utc.with_ymd_and_hms(2026, 3, 1, 10, 20, 0).unwrap());
        let mut job = hourly_job();
        CronPolicy.on_create(&ctx, &mut job).await.unwrap();
        assert_eq!(
            job.run_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn pinned_run_at_is_preserved() {
        let ctx = context();
        let pinned = ctx.now + chrono::Duration::days(2);
        let mut job = hourly_job();
        job.run_at = Some(pinned);
        CronPolicy.on_create(&ctx, &mut job).await.unwrap();
        assert_eq!(job.run_at, Some(pinned));
    }

    #[tokio::test]
    async fn missing_schedule_is_rejected() {
        let ctx = context();
        let mut job = Job::new("reports::hourly");
        assert!(CronPolicy.on_create(&ctx, &mut job).await.is_err());

        job.cron_schedule = Some("junk".into());
        assert!(CronPolicy.on_create(&ctx, &mut job).await.is_err());
    }

    #[tokio::test]
    async fn completion_inserts_copy_for_next_occurrence() {
        let ctx = context().at(Utc.with_ymd_and_hms(2026, 3, 1, 10, 59, 59).unwrap());
        let mut job = hourly_job();
        job.fire(JobEvent::Start).unwrap();
        job.fire(JobEvent::Complete).unwrap();

        CronPolicy.after_complete(&ctx, &mut job).await.unwrap();

        let queued = ctx
            .store
            .jobs_with_states(&[JobState::Queued])
            .await
            .unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(
            queued[0].run_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap())
        );
        assert_eq!(queued[0].cron_schedule.as_deref(), Some("0 0 * * * *"));
    }
}
