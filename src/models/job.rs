//! # Job Model
//!
//! A job is a persisted unit of scheduled work. Batch jobs own input/output
//! categories whose records are split into slices; non-batch jobs run as a
//! single unit. Lifecycle moves exclusively through the declared state
//! machine; recurrence (restart/cron/retry-after-abort) is achieved by
//! creating a *new* job record copied from the old one, never by rewinding a
//! terminal record.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SliceworksError};
use crate::state_machine::{JobEvent, JobState, StateMachine, Stateful};

/// Structured error captured when user logic raises during a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobException {
    pub class_name: String,
    pub message: String,
    pub backtrace: Vec<String>,
    pub worker_name: Option<String>,
    /// Record number within a slice, for slice-level failures.
    pub record_number: Option<u64>,
}

impl JobException {
    pub fn new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            message: message.into(),
            backtrace: Vec::new(),
            worker_name: None,
            record_number: None,
        }
    }

    pub fn with_worker(mut self, worker_name: impl Into<String>) -> Self {
        self.worker_name = Some(worker_name.into());
        self
    }

    pub fn with_record_number(mut self, record_number: u64) -> Self {
        self.record_number = Some(record_number);
        self
    }
}

use super::category::{Category, Direction};

/// A persisted unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Behavior key: selects the registered [`JobBehavior`] implementation.
    ///
    /// [`JobBehavior`]: crate::runtime::JobBehavior
    pub job_type: String,
    pub description: Option<String>,
    pub state: JobState,
    /// Lower is more urgent.
    pub priority: i32,
    /// Not claimable before this time.
    pub run_at: Option<DateTime<Utc>>,
    /// Retry gives up once past this time.
    pub expire_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub worker_name: Option<String>,
    pub failure_count: u32,
    pub exception: Option<JobException>,
    pub record_count: u64,
    pub percent_complete: u8,
    pub retry_limit: u32,
    /// Timestamp of every failure, appended by the retry policy.
    pub failed_at_list: Vec<DateTime<Utc>>,
    pub cron_schedule: Option<String>,
    /// Job types this job's throttle gate waits on.
    pub dependent_job_types: Vec<String>,
    /// Cron expression opening each processing window.
    pub processing_schedule: Option<String>,
    /// How long a processing window stays open, in seconds.
    pub processing_duration_secs: Option<u64>,
    pub input_categories: Vec<Category>,
    pub output_categories: Vec<Category>,
    /// Keep slice collections around after completion.
    pub retain_completed: bool,
    /// Opaque user arguments for the behavior.
    pub data: serde_json::Value,
}

impl Job {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            description: None,
            state: JobState::Queued,
            priority: 50,
            run_at: None,
            expire_at: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            worker_name: None,
            failure_count: 0,
            exception: None,
            record_count: 0,
            percent_complete: 0,
            retry_limit: 0,
            failed_at_list: Vec::new(),
            cron_schedule: None,
            dependent_job_types: Vec::new(),
            processing_schedule: None,
            processing_duration_secs: None,
            input_categories: Vec::new(),
            output_categories: Vec::new(),
            retain_completed: false,
            data: serde_json::Value::Null,
        }
    }

    /// A job with at least one input category is processed slice by slice.
    pub fn is_batch(&self) -> bool {
        !self.input_categories.is_empty()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at.is_some_and(|at| at <= now)
    }

    /// Whether the job may be claimed at `now` (queued and past `run_at`).
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Queued && self.run_at.map_or(true, |at| at <= now)
    }

    pub fn input_category(&self, name: &str) -> Option<&Category> {
        self.input_categories.iter().find(|c| c.name == name)
    }

    pub fn output_category(&self, name: &str) -> Option<&Category> {
        self.output_categories.iter().find(|c| c.name == name)
    }

    /// Wall-clock processing time so far, if started.
    pub fn duration(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.started_at
            .map(|started| self.completed_at.unwrap_or(now) - started)
    }

    /// Reject invalid configuration before persistence.
    pub fn validate(&self) -> Result<()> {
        if self.job_type.is_empty() {
            return Err(SliceworksError::Validation(
                "job_type must not be empty".into(),
            ));
        }
        for categories in [&self.input_categories, &self.output_categories] {
            let mut seen = std::collections::HashSet::new();
            for category in categories.iter() {
                category.validate()?;
                if !seen.insert(category.name.as_str()) {
                    return Err(SliceworksError::Validation(format!(
                        "duplicate {} category '{}'",
                        category.direction, category.name
                    )));
                }
            }
        }
        if self
            .input_categories
            .iter()
            .any(|c| c.direction != Direction::Input)
            || self
                .output_categories
                .iter()
                .any(|c| c.direction != Direction::Output)
        {
            return Err(SliceworksError::Validation(
                "category registered under the wrong direction".into(),
            ));
        }
        if self.is_batch() && self.input_category("main").is_none() {
            return Err(SliceworksError::Validation(
                "batch jobs require a 'main' input category".into(),
            ));
        }
        Ok(())
    }

    /// Copy for restart/cron recurrence: everything except identity,
    /// timestamps, counters, and failure/result fields.
    pub fn copy_for_restart(&self) -> Job {
        let mut copy = Job::new(self.job_type.clone());
        copy.description = self.description.clone();
        copy.priority = self.priority;
        copy.expire_at = self.expire_at;
        copy.retry_limit = self.retry_limit;
        copy.cron_schedule = self.cron_schedule.clone();
        copy.dependent_job_types = self.dependent_job_types.clone();
        copy.processing_schedule = self.processing_schedule.clone();
        copy.processing_duration_secs = self.processing_duration_secs;
        copy.input_categories = self.input_categories.clone();
        copy.output_categories = self.output_categories.clone();
        copy.retain_completed = self.retain_completed;
        copy.data = self.data.clone();
        copy
    }

    /// The shared job transition table with its bookkeeping callbacks.
    pub fn machine() -> &'static StateMachine<Job> {
        static MACHINE: OnceLock<StateMachine<Job>> = OnceLock::new();
        MACHINE.get_or_init(|| {
            let mut machine = StateMachine::new(JobState::Queued);
            machine
                .event(JobEvent::Start.name())
                .transition(JobState::Queued, JobState::Running)
                .before(|job: &mut Job| {
                    job.started_at = Some(Utc::now());
                    Ok(())
                });
            machine
                .event(JobEvent::Pause.name())
                .transition(JobState::Running, JobState::Paused);
            machine
                .event(JobEvent::Resume.name())
                .transition(JobState::Paused, JobState::Running);
            machine
                .event(JobEvent::Complete.name())
                .transition(JobState::Running, JobState::Completed)
                .before(|job: &mut Job| {
                    job.completed_at = Some(Utc::now());
                    job.percent_complete = 100;
                    job.worker_name = None;
                    Ok(())
                });
            machine
                .event(JobEvent::Fail.name())
                .transition(JobState::Running, JobState::Failed)
                .transition(JobState::Queued, JobState::Failed)
                .before(|job: &mut Job| {
                    job.failure_count += 1;
                    job.worker_name = None;
                    Ok(())
                });
            machine
                .event(JobEvent::Abort.name())
                .transition_from_any(JobState::Aborted)
                .before(|job: &mut Job| {
                    job.completed_at = Some(Utc::now());
                    job.worker_name = None;
                    Ok(())
                });
            machine
                .event(JobEvent::Retry.name())
                .transition(JobState::Failed, JobState::Queued)
                .before(|job: &mut Job| {
                    job.exception = None;
                    job.started_at = None;
                    job.completed_at = None;
                    Ok(())
                });
            machine
        })
    }

    /// Fire a lifecycle event through the shared machine.
    pub fn fire(&mut self, event: JobEvent) -> Result<JobState> {
        Ok(Self::machine().fire(self, event.name())?)
    }

    pub fn fail_with(&mut self, exception: JobException) -> Result<JobState> {
        let state = self.fire(JobEvent::Fail)?;
        self.exception = Some(exception);
        Ok(state)
    }
}

impl Stateful for Job {
    type State = JobState;

    fn state(&self) -> JobState {
        self.state
    }

    fn set_state(&mut self, state: JobState) {
        self.state = state;
    }
}
