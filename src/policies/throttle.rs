//! Hold a job back while the job types it depends on are running.

use async_trait::async_trait;
use chrono::Duration;
use tracing::debug;

use crate::error::Result;
use crate::models::Job;

use super::{JobPolicy, PolicyContext, StartDecision};

/// Defers a claimed job while any of its `dependent_job_types` has a running
/// instance. Deferral reschedules the job one throttle-check interval out,
/// so the gate is re-evaluated on a cadence instead of busy-polling.
#[derive(Debug, Default)]
pub struct ThrottlePolicy;

#[async_trait]
impl JobPolicy for ThrottlePolicy {
    fn name(&self) -> &'static str {
        "throttle"
    }

    async fn before_start(&self, ctx: &PolicyContext, job: &Job) -> Result<StartDecision> {
        if job.dependent_job_types.is_empty() {
            return Ok(StartDecision::Proceed);
        }
        if !ctx
            .store
            .any_running_of_types(&job.dependent_job_types)
            .await?
        {
            return Ok(StartDecision::Proceed);
        }
        let recheck_at =
            ctx.now + Duration::seconds(ctx.config.retry.throttle_check_interval_secs as i64);
        debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            dependent_job_types = ?job.dependent_job_types,
            "dependent job still running; deferring"
        );
        Ok(StartDecision::Defer {
            run_at: Some(recheck_at),
            reason: "dependent job types still running".into(),
        })
    }
}
