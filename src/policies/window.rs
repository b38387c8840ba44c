//! Confine processing to recurring windows of wall-clock time.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::models::Job;

use super::{next_occurrence, parse_schedule, JobPolicy, PolicyContext, RunDecision, StartDecision};

/// Restricts a job to windows opened by its `processing_schedule` cron
/// expression and lasting `processing_duration_secs`.
///
/// Outside a window the claimed job is deferred until the next window opens.
/// If the window closes while the job is running, the run is interrupted;
/// the runtime aborts it and schedules a copy for the next window, so slice
/// progress made so far is not repeated.
#[derive(Debug, Default)]
pub struct ProcessingWindowPolicy;

fn window_of(job: &Job) -> Option<(&str, Duration)> {
    let schedule = job.processing_schedule.as_deref()?;
    let duration = Duration::seconds(job.processing_duration_secs? as i64);
    Some((schedule, duration))
}

/// A window is open at `now` when some occurrence opened within the last
/// `duration`.
fn window_open(
    schedule: &::cron::Schedule,
    duration: Duration,
    now: DateTime<Utc>,
) -> bool {
    schedule
        .after(&(now - duration))
        .take_while(|opens| *opens <= now)
        .next()
        .is_some()
}

#[async_trait]
impl JobPolicy for ProcessingWindowPolicy {
    fn name(&self) -> &'static str {
        "processing_window"
    }

    /// Point a freshly created job at the next window instead of letting it
    /// sit claimable only to be deferred on every poll.
    async fn on_create(&self, ctx: &PolicyContext, job: &mut Job) -> Result<()> {
        let Some((expression, duration)) = window_of(job) else {
            return Ok(());
        };
        let schedule = parse_schedule(expression)?;
        if job.run_at.is_none() && !window_open(&schedule, duration, ctx.now) {
            job.run_at = next_occurrence(&schedule, ctx.now);
        }
        Ok(())
    }

    async fn before_start(&self, ctx: &PolicyContext, job: &Job) -> Result<StartDecision> {
        let Some((expression, duration)) = window_of(job) else {
            return Ok(StartDecision::Proceed);
        };
        let schedule = parse_schedule(expression)?;
        if window_open(&schedule, duration, ctx.now) {
            return Ok(StartDecision::Proceed);
        }
        Ok(StartDecision::Defer {
            run_at: next_occurrence(&schedule, ctx.now),
            reason: "outside processing window".into(),
        })
    }

    async fn while_running(&self, ctx: &PolicyContext, job: &Job) -> Result<RunDecision> {
        let Some((expression, duration)) = window_of(job) else {
            return Ok(RunDecision::Continue);
        };
        let schedule = parse_schedule(expression)?;
        if window_open(&schedule, duration, ctx.now) {
            return Ok(RunDecision::Continue);
        }
        Ok(RunDecision::Interrupt {
            reason: "processing window closed".into(),
            resume_at: next_occurrence(&schedule, ctx.now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::test_support::context;
    use chrono::TimeZone;

    // Ten minutes at the top of every hour.
    fn windowed_job() -> Job {
        let mut job = Job::new("exports::ledger");
        job.processing_schedule = Some("0 0 * * * *".into());
        job.processing_duration_secs = Some(600);
        job
    }

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, minute, second).unwrap()
    }

    #[test]
    fn window_open_math() {
        let schedule = parse_schedule("0 0 * * * *").unwrap();
        let ten_minutes = Duration::seconds(600);
        assert!(window_open(&schedule, ten_minutes, at(0, 0)));
        assert!(window_open(&schedule, ten_minutes, at(9, 59)));
        assert!(!window_open(&schedule, ten_minutes, at(10, 0)));
        assert!(!window_open(&schedule, ten_minutes, at(59, 59)));
    }

    #[tokio::test]
    async fn defers_outside_the_window() {
        let job = windowed_job();

        let inside = context().at(at(5, 0));
        assert_eq!(
            ProcessingWindowPolicy
                .before_start(&inside, &job)
                .await
                .unwrap(),
            StartDecision::Proceed
        );

        let outside = context().at(at(30, 0));
        match ProcessingWindowPolicy
            .before_start(&outside, &job)
            .await
            .unwrap()
        {
            StartDecision::Defer { run_at, .. } => {
                assert_eq!(
                    run_at,
                    Some(Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap())
                );
            }
            StartDecision::Proceed => panic!("expected a deferral"),
        }
    }

    #[tokio::test]
    async fn interrupts_when_the_window_closes_mid_run() {
        let job = windowed_job();

        let still_open = context().at(at(8, 0));
        assert_eq!(
            ProcessingWindowPolicy
                .while_running(&still_open, &job)
                .await
                .unwrap(),
            RunDecision::Continue
        );

        let closed = context().at(at(12, 0));
        match ProcessingWindowPolicy
            .while_running(&closed, &job)
            .await
            .unwrap()
        {
            RunDecision::Interrupt { resume_at, .. } => {
                assert_eq!(
                    resume_at,
                    Some(Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap())
                );
            }
            RunDecision::Continue => panic!("expected an interrupt"),
        }
    }

    #[tokio::test]
    async fn creation_outside_the_window_schedules_the_next_open() {
        let mut job = windowed_job();
        let ctx = context().at(at(30, 0));
        ProcessingWindowPolicy
            .on_create(&ctx, &mut job)
            .await
            .unwrap();
        assert_eq!(
            job.run_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap())
        );

        // Inside the window, or explicitly pinned, run_at is left alone.
        let mut inside = windowed_job();
        let ctx = context().at(at(5, 0));
        ProcessingWindowPolicy
            .on_create(&ctx, &mut inside)
            .await
            .unwrap();
        assert_eq!(inside.run_at, None);
    }

    #[tokio::test]
    async fn unwindowed_job_is_unaffected() {
        let ctx = context();
        let job = Job::new("exports::ledger");
        assert_eq!(
            ProcessingWindowPolicy
                .before_start(&ctx, &job)
                .await
                .unwrap(),
            StartDecision::Proceed
        );
    }
}
