//! At most one active instance of a job type.

use async_trait::async_trait;

use crate::error::{Result, SliceworksError};
use crate::models::Job;

use super::{JobPolicy, PolicyContext};

/// Rejects creation of a job while another job of the same type is in any
/// non-terminal state. Enforced at creation so a duplicate never enters the
/// queue; completed and aborted history does not count.
#[derive(Debug, Default)]
pub struct SingletonPolicy;

#[async_trait]
impl JobPolicy for SingletonPolicy {
    fn name(&self) -> &'static str {
        "singleton"
    }

    async fn on_create(&self, ctx: &PolicyContext, job: &mut Job) -> Result<()> {
        let active = ctx
            .store
            .active_count_of_type(&job.job_type, Some(job.id))
            .await?;
        if active > 0 {
            return Err(SliceworksError::Validation(format!(
                "a job of type '{}' is already queued or running",
                job.job_type
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::test_support::context;
    use crate::state_machine::JobEvent;
    use crate::store::JobStore;

    #[tokio::test]
    async fn duplicate_active_job_is_rejected() {
        let ctx = context();
        let existing = Job::new("imports::invoices");
        ctx.store.insert_job(existing).await.unwrap();

        let mut duplicate = Job::new("imports::invoices");
        assert!(SingletonPolicy
            .on_create(&ctx, &mut duplicate)
            .await
            .is_err());

        // A different type is unaffected.
        let mut other = Job::new("exports::ledger");
        assert!(SingletonPolicy.on_create(&ctx, &mut other).await.is_ok());
    }

    #[tokio::test]
    async fn terminal_history_does_not_block() {
        let ctx = context();
        let mut done = Job::new("imports::invoices");
        done.fire(JobEvent::Start).unwrap();
        done.fire(JobEvent::Complete).unwrap();
        ctx.store.insert_job(done).await.unwrap();

        let mut fresh = Job::new("imports::invoices");
        assert!(SingletonPolicy.on_create(&ctx, &mut fresh).await.is_ok());
    }
}
