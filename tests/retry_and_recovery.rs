//! Failure handling scenarios: retry escalation through the worker loop and
//! zombie-server recovery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use sliceworks::codec::Codec;
use sliceworks::config::SliceworksConfig;
use sliceworks::models::{Heartbeat, Job, Record, ServerRecord, Slice};
use sliceworks::policies::{PolicySet, RetryPolicy};
use sliceworks::runtime::{reap_zombies, BehaviorRegistry, JobBehavior, Shutdown, Worker};
use sliceworks::state_machine::{JobState, ServerState, SliceState};
use sliceworks::store::{CollectionId, JobStore, MemoryStore, ServerStore, SliceStoreBackend, Store};

struct AlwaysFails;

#[async_trait]
impl JobBehavior for AlwaysFails {
    fn job_type(&self) -> &'static str {
        "tests::always_fails"
    }

    async fn perform(&self, _job: &mut Job) -> sliceworks::Result<()> {
        Err(sliceworks::SliceworksError::Execution {
            class_name: "Deliberate".into(),
            message: "always fails".into(),
        })
    }
}

async fn wait_for<F>(store: &Arc<dyn Store>, id: uuid::Uuid, mut predicate: F) -> Job
where
    F: FnMut(&Job) -> bool,
{
    for _ in 0..500 {
        let job = store.get_job(id).await.unwrap().unwrap();
        if predicate(&job) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never reached");
}

#[tokio::test]
async fn retries_escalate_until_the_limit_then_fail_for_good() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let registry = Arc::new(BehaviorRegistry::new());
    registry.register(
        Arc::new(AlwaysFails),
        PolicySet::new().with(Arc::new(RetryPolicy)),
    );

    let mut config = SliceworksConfig::default();
    config.server.stagger_first_poll = false;
    config.worker.poll_interval_secs = 1;

    let mut job = Job::new("tests::always_fails");
    job.retry_limit = 3;
    let job_id = registry
        .submit(Arc::clone(&store), &config, job)
        .await
        .unwrap();

    let shutdown = Shutdown::new();
    let worker = Worker::new(
        "host:1:0".into(),
        Arc::clone(&store),
        config,
        Arc::clone(&registry),
        shutdown.clone(),
    );
    let handle = tokio::spawn(worker.run());

    for attempt in 1..=3u32 {
        let job = wait_for(&store, job_id, |j| {
            j.state == JobState::Queued && j.failure_count == attempt
        })
        .await;

        // Backoff lower bound: failure_count^4 + 15 seconds from the failure.
        let delay = (job.run_at.unwrap() - Utc::now()).num_seconds();
        let floor = i64::from(attempt).pow(4) + 15;
        assert!(
            delay > floor - 5,
            "attempt {attempt}: delay {delay}s below floor {floor}s"
        );

        // Make the job claimable again instead of waiting out the backoff.
        let mut eager = job.clone();
        eager.run_at = None;
        store.update_job(&eager).await.unwrap();
    }

    // Fourth failure exhausts retry_limit 3 and is terminal.
    let job = wait_for(&store, job_id, |j| j.state == JobState::Failed).await;
    assert_eq!(job.failure_count, 4);
    assert_eq!(job.failed_at_list.len(), 4);
    assert_eq!(job.exception.as_ref().unwrap().class_name, "Deliberate");

    shutdown.trigger();
    handle.await.unwrap();
}

#[tokio::test]
async fn zombie_recovery_lets_a_live_worker_finish_the_job() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

    // A server that stopped heartbeating 45s ago against a 40s threshold.
    let mut config = SliceworksConfig::default();
    config.server.heartbeat_interval_secs = 10;
    config.server.missed_heartbeat_threshold = 4;

    let mut dead = ServerRecord::new(1);
    dead.name = "deadhost:7".into();
    dead.state = ServerState::Running;
    dead.heartbeat = Some(Heartbeat {
        updated_at: Utc::now() - chrono::Duration::seconds(45),
        worker_count: 1,
    });
    store.upsert_server(&dead).await.unwrap();

    // Its worker died holding a job and a running slice.
    let dead_worker = dead.worker_name(0);
    let job = Job::new("imports::invoices");
    let job_id = job.id;
    store.insert_job(job).await.unwrap();
    store
        .claim_next_job(&dead_worker, Utc::now())
        .await
        .unwrap();

    let collection = CollectionId::input(job_id, "main");
    for id in 1..=2 {
        let slice = Slice::build(id, id, vec![Record::from("r")], &Codec::plain()).unwrap();
        store.insert_slice(&collection, slice).await.unwrap();
    }
    store
        .claim_next_slice(&collection, &dead_worker)
        .await
        .unwrap();

    let reaped = reap_zombies(store.as_ref(), &config, "livehost:1")
        .await
        .unwrap();
    assert_eq!(reaped, 1);
    assert!(store.servers().await.unwrap().is_empty());

    // Everything is claimable again, by a different worker.
    let job = store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Queued);

    let reclaimed = store
        .claim_next_job("livehost:1:0", Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reclaimed.id, job_id);

    let slice = store
        .claim_next_slice(&collection, "livehost:1:0")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(slice.id, 1);
    assert_eq!(slice.state, SliceState::Running);

    let counts = store.slice_counts_by_state(&collection).await.unwrap();
    assert_eq!(counts.get(&SliceState::Running), Some(&1));
    assert_eq!(counts.get(&SliceState::Queued), Some(&1));
}
