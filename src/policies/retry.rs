//! Automatic retry with polynomial backoff and jitter.

use async_trait::async_trait;
use chrono::Duration;
use rand::Rng;
use tracing::{info, warn};

use crate::error::Result;
use crate::models::Job;
use crate::state_machine::{JobEvent, JobState};

use super::{JobPolicy, PolicyContext};

/// Requeues failed jobs until the retry limit is exhausted or the job
/// expires. Each failure is stamped into `failed_at_list` and the requeue is
/// delayed by a backoff that grows with the failure count.
#[derive(Debug, Default)]
pub struct RetryPolicy;

/// Seconds to wait before attempt `failure_count + 1`:
/// `failure_count^4 + 15 + rand(0..30) * (failure_count + 1)`.
///
/// Early failures retry within a minute; by the tenth failure the wait is
/// measured in hours, spreading stampedes without an explicit cap.
pub fn retry_delay(failure_count: u32) -> Duration {
    let count = i64::from(failure_count);
    let jitter = rand::thread_rng().gen_range(0..30);
    Duration::seconds(count.pow(4) + 15 + jitter * (count + 1))
}

#[async_trait]
impl JobPolicy for RetryPolicy {
    fn name(&self) -> &'static str {
        "retry"
    }

    /// A job that never set its own limit inherits the configured default.
    async fn on_create(&self, ctx: &PolicyContext, job: &mut Job) -> Result<()> {
        if job.retry_limit == 0 {
            job.retry_limit = ctx.config.retry.default_retry_limit;
        }
        Ok(())
    }

    async fn after_fail(&self, ctx: &PolicyContext, job: &mut Job) -> Result<()> {
        if job.state != JobState::Failed {
            return Ok(());
        }
        job.failed_at_list.push(ctx.now);

        if job.is_expired(ctx.now) {
            warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                "job expired; not retrying"
            );
            return Ok(());
        }
        if job.failure_count > job.retry_limit {
            warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                failure_count = job.failure_count,
                retry_limit = job.retry_limit,
                "retry limit exhausted; leaving job failed"
            );
            return Ok(());
        }

        let delay = retry_delay(job.failure_count);
        job.fire(JobEvent::Retry)?;
        job.run_at = Some(ctx.now + delay);
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            failure_count = job.failure_count,
            delay_secs = delay.num_seconds(),
            "requeued failed job for retry"
        );
        Ok(())
    }
}
