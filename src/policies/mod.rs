//! # Job Policies
//!
//! Cross-cutting lifecycle behaviors that jobs opt into per job type:
//! retry with backoff, restart-on-completion, cron recurrence, singleton
//! enforcement, dependent-job throttling, and processing windows.
//!
//! Policies observe and steer the lifecycle through named hooks; they never
//! bypass the state machine. A [`PolicySet`] runs hooks in registration
//! order, and the first policy that defers or interrupts wins. Claiming is
//! atomic and happens *before* gating: a claimed job that a policy defers is
//! released back to the store rather than never claimed.

mod cron;
mod restart;
mod retry;
mod singleton;
mod throttle;
mod window;

pub use cron::CronPolicy;
pub use restart::RestartPolicy;
pub use retry::RetryPolicy;
pub use singleton::SingletonPolicy;
pub use throttle::ThrottlePolicy;
pub use window::ProcessingWindowPolicy;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::SliceworksConfig;
use crate::error::{Result, SliceworksError};
use crate::models::Job;
use crate::store::Store;

/// Shared collaborators handed to every policy hook. `now` is captured once
/// per lifecycle event so every policy in a set sees the same clock reading.
pub struct PolicyContext {
    pub store: Arc<dyn Store>,
    pub config: SliceworksConfig,
    pub now: DateTime<Utc>,
}

impl PolicyContext {
    pub fn new(store: Arc<dyn Store>, config: SliceworksConfig) -> Self {
        Self {
            store,
            config,
            now: Utc::now(),
        }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

/// Verdict of the pre-start gate on an already-claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartDecision {
    Proceed,
    /// Release the claim and put the job back in the queue, optionally not
    /// before `run_at`.
    Defer {
        run_at: Option<DateTime<Utc>>,
        reason: String,
    },
}

/// Verdict of the mid-run check between units of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunDecision {
    Continue,
    /// Stop processing now; the job is aborted and, when `resume_at` is set,
    /// a fresh copy is scheduled for that time.
    Interrupt {
        reason: String,
        resume_at: Option<DateTime<Utc>>,
    },
}

/// One pluggable lifecycle behavior. Every hook defaults to a no-op so a
/// policy implements only the moments it cares about.
#[async_trait]
pub trait JobPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs before the job record is first persisted. May mutate the job
    /// (apply defaults, compute `run_at`) or reject it outright.
    async fn on_create(&self, _ctx: &PolicyContext, _job: &mut Job) -> Result<()> {
        Ok(())
    }

    /// Gate on a freshly-claimed job, before any work begins.
    async fn before_start(&self, _ctx: &PolicyContext, _job: &Job) -> Result<StartDecision> {
        Ok(StartDecision::Proceed)
    }

    /// Re-checked between units of work on a running job.
    async fn while_running(&self, _ctx: &PolicyContext, _job: &Job) -> Result<RunDecision> {
        Ok(RunDecision::Continue)
    }

    /// Runs after the job transitions to completed, before persistence.
    async fn after_complete(&self, _ctx: &PolicyContext, _job: &mut Job) -> Result<()> {
        Ok(())
    }

    /// Runs after a failure is recorded. A policy may requeue the job
    /// (retry) or escalate it (abort + restart copy).
    async fn after_fail(&self, _ctx: &PolicyContext, _job: &mut Job) -> Result<()> {
        Ok(())
    }

    /// Runs after the job transitions to aborted.
    async fn after_abort(&self, _ctx: &PolicyContext, _job: &mut Job) -> Result<()> {
        Ok(())
    }
}

/// Ordered collection of policies for one job type.
#[derive(Default)]
pub struct PolicySet {
    policies: Vec<Arc<dyn JobPolicy>>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, policy: Arc<dyn JobPolicy>) -> Self {
        self.policies.push(policy);
        self
    }

    pub async fn on_create(&self, ctx: &PolicyContext, job: &mut Job) -> Result<()> {
        for policy in &self.policies {
            policy.on_create(ctx, job).await?;
        }
        Ok(())
    }

    /// First non-`Proceed` decision wins.
    pub async fn before_start(&self, ctx: &PolicyContext, job: &Job) -> Result<StartDecision> {
        for policy in &self.policies {
            match policy.before_start(ctx, job).await? {
                StartDecision::Proceed => continue,
                decision => return Ok(decision),
            }
        }
        Ok(StartDecision::Proceed)
    }

    /// First non-`Continue` decision wins.
    pub async fn while_running(&self, ctx: &PolicyContext, job: &Job) -> Result<RunDecision> {
        for policy in &self.policies {
            match policy.while_running(ctx, job).await? {
                RunDecision::Continue => continue,
                decision => return Ok(decision),
            }
        }
        Ok(RunDecision::Continue)
    }

    pub async fn after_complete(&self, ctx: &PolicyContext, job: &mut Job) -> Result<()> {
        for policy in &self.policies {
            policy.after_complete(ctx, job).await?;
        }
        Ok(())
    }

    pub async fn after_fail(&self, ctx: &PolicyContext, job: &mut Job) -> Result<()> {
        for policy in &self.policies {
            policy.after_fail(ctx, job).await?;
        }
        Ok(())
    }

    pub async fn after_abort(&self, ctx: &PolicyContext, job: &mut Job) -> Result<()> {
        for policy in &self.policies {
            policy.after_abort(ctx, job).await?;
        }
        Ok(())
    }
}

/// Parse a cron expression (seconds-resolution, six or seven fields).
pub(crate) fn parse_schedule(expression: &str) -> Result<::cron::Schedule> {
    ::cron::Schedule::from_str(expression).map_err(|e| {
        SliceworksError::Validation(format!("invalid cron expression '{expression}': {e}"))
    })
}

/// Next occurrence strictly after `now`.
pub(crate) fn next_occurrence(
    schedule: &::cron::Schedule,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    schedule.after(&now).next()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::store::MemoryStore;

    pub fn context() -> PolicyContext {
        PolicyContext::new(Arc::new(MemoryStore::new()), SliceworksConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct DeferAlways;

    #[async_trait]
    impl JobPolicy for DeferAlways {
        fn name(&self) -> &'static str {
            "defer_always"
        }

        async fn before_start(&self, _ctx: &PolicyContext, _job: &Job) -> Result<StartDecision> {
            Ok(StartDecision::Defer {
                run_at: None,
                reason: "not yet".into(),
            })
        }
    }

    struct ProceedAlways;

    #[async_trait]
    impl JobPolicy for ProceedAlways {
        fn name(&self) -> &'static str {
            "proceed_always"
        }
    }

    #[tokio::test]
    async fn first_deferring_policy_wins() {
        let ctx = test_support::context();
        let job = Job::new("imports::invoices");

        let set = PolicySet::new()
            .with(Arc::new(ProceedAlways))
            .with(Arc::new(DeferAlways));
        match set.before_start(&ctx, &job).await.unwrap() {
            StartDecision::Defer { reason, .. } => assert_eq!(reason, "not yet"),
            StartDecision::Proceed => panic!("expected a deferral"),
        }

        let empty = PolicySet::new();
        assert_eq!(
            empty.before_start(&ctx, &job).await.unwrap(),
            StartDecision::Proceed
        );
    }

    #[test]
    fn schedule_parsing_and_next_occurrence() {
        let schedule = parse_schedule("0 0 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 20, 0).unwrap();
        assert_eq!(
            next_occurrence(&schedule, now),
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap())
        );

        assert!(parse_schedule("not a schedule").is_err());
    }
}
