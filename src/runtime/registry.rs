//! Job behavior registration and the job submission path.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use crate::config::SliceworksConfig;
use crate::error::{Result, SliceworksError};
use crate::models::{Job, Record};
use crate::policies::{PolicyContext, PolicySet};
use crate::store::Store;

/// User-supplied logic for one job type.
///
/// Non-batch jobs implement [`perform`]; batch jobs implement
/// [`process_record`], which is invoked once per record in a claimed slice
/// and may emit one output record.
///
/// [`perform`]: JobBehavior::perform
/// [`process_record`]: JobBehavior::process_record
#[async_trait]
pub trait JobBehavior: Send + Sync {
    /// The `job_type` key this behavior serves.
    fn job_type(&self) -> &'static str;

    async fn perform(&self, job: &mut Job) -> Result<()> {
        Err(SliceworksError::Execution {
            class_name: job.job_type.clone(),
            message: "perform is not implemented for this job type".into(),
        })
    }

    async fn process_record(&self, job: &Job, _record: &Record) -> Result<Option<Record>> {
        Err(SliceworksError::Execution {
            class_name: job.job_type.clone(),
            message: "process_record is not implemented for this job type".into(),
        })
    }
}

struct Registration {
    behavior: Arc<dyn JobBehavior>,
    policies: Arc<PolicySet>,
}

/// Maps `job_type` to its behavior and policy set. Shared read-mostly across
/// all workers.
#[derive(Default)]
pub struct BehaviorRegistry {
    registrations: DashMap<String, Registration>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, behavior: Arc<dyn JobBehavior>, policies: PolicySet) {
        let job_type = behavior.job_type().to_string();
        info!(job_type = %job_type, "registered job behavior");
        self.registrations.insert(
            job_type,
            Registration {
                behavior,
                policies: Arc::new(policies),
            },
        );
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.registrations.contains_key(job_type)
    }

    pub fn behavior(&self, job_type: &str) -> Option<Arc<dyn JobBehavior>> {
        self.registrations
            .get(job_type)
            .map(|r| Arc::clone(&r.behavior))
    }

    pub fn policies(&self, job_type: &str) -> Option<Arc<PolicySet>> {
        self.registrations
            .get(job_type)
            .map(|r| Arc::clone(&r.policies))
    }

    /// Validate a job, run its creation policies, and persist it queued.
    pub async fn submit(
        &self,
        store: Arc<dyn Store>,
        config: &SliceworksConfig,
        mut job: Job,
    ) -> Result<Uuid> {
        if !self.contains(&job.job_type) {
            return Err(SliceworksError::Validation(format!(
                "no behavior registered for job type '{}'",
                job.job_type
            )));
        }
        job.validate()?;

        if let Some(policies) = self.policies(&job.job_type) {
            let ctx = PolicyContext::new(Arc::clone(&store), config.clone());
            policies.on_create(&ctx, &mut job).await?;
        }

        let id = job.id;
        info!(job_id = %id, job_type = %job.job_type, "job submitted");
        store.insert_job(job).await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::SingletonPolicy;
    use crate::store::MemoryStore;

    struct NoopBehavior;

    #[async_trait]
    impl JobBehavior for NoopBehavior {
        fn job_type(&self) -> &'static str {
            "tests::noop"
        }

        async fn perform(&self, _job: &mut Job) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn submit_requires_a_registered_behavior() {
        let registry = BehaviorRegistry::new();
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let config = SliceworksConfig::default();

        let err = registry
            .submit(Arc::clone(&store), &config, Job::new("tests::unknown"))
            .await
            .unwrap_err();
        assert!(matches!(err, SliceworksError::Validation(_)));

        registry.register(Arc::new(NoopBehavior), PolicySet::new());
        let id = registry
            .submit(Arc::clone(&store), &config, Job::new("tests::noop"))
            .await
            .unwrap();
        assert!(store.get_job(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn submit_runs_creation_policies() {
        let registry = BehaviorRegistry::new();
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let config = SliceworksConfig::default();

        registry.register(
            Arc::new(NoopBehavior),
            PolicySet::new().with(Arc::new(SingletonPolicy)),
        );

        registry
            .submit(Arc::clone(&store), &config, Job::new("tests::noop"))
            .await
            .unwrap();
        // Second active instance is rejected by the singleton gate.
        assert!(registry
            .submit(store, &config, Job::new("tests::noop"))
            .await
            .is_err());
    }
}
