//! Top-level process supervision: OS signals, the server lifecycle, and
//! recovery of work stranded by dead servers.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::SliceworksConfig;
use crate::error::Result;
use crate::logging;
use crate::store::Store;

use super::commands::CommandEnvelope;
use super::registry::BehaviorRegistry;
use super::server::Server;
use super::shutdown::Shutdown;

const COMMAND_INBOX_DEPTH: usize = 16;

/// Runs one [`Server`] to completion, wiring SIGINT/SIGTERM to graceful
/// shutdown and periodically reaping zombie servers so their in-flight jobs
/// and slices return to the queue.
pub struct Supervisor {
    store: Arc<dyn Store>,
    config: SliceworksConfig,
    registry: Arc<BehaviorRegistry>,
    shutdown: Shutdown,
    command_tx: mpsc::Sender<CommandEnvelope>,
    command_rx: mpsc::Receiver<CommandEnvelope>,
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn Store>,
        config: SliceworksConfig,
        registry: Arc<BehaviorRegistry>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_INBOX_DEPTH);
        Self {
            store,
            config,
            registry,
            shutdown: Shutdown::new(),
            command_tx,
            command_rx,
        }
    }

    /// Handle for delivering operator commands to the supervised server.
    pub fn command_sender(&self) -> mpsc::Sender<CommandEnvelope> {
        self.command_tx.clone()
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Block until the server exits, either by command or by signal.
    pub async fn run(self) -> Result<()> {
        logging::init();

        let server = Server::new(
            Arc::clone(&self.store),
            self.config.clone(),
            Arc::clone(&self.registry),
            self.shutdown.clone(),
            self.command_rx,
        );
        let own_name = server.name().to_string();

        let signal_task = tokio::spawn(listen_for_signals(self.shutdown.clone()));
        let scan_stop = Shutdown::new();
        let scan_task = tokio::spawn(zombie_scan_loop(
            Arc::clone(&self.store),
            self.config.clone(),
            own_name,
            scan_stop.clone(),
        ));

        let outcome = server.run().await;

        scan_stop.trigger();
        let _ = scan_task.await;
        signal_task.abort();
        outcome
    }
}

#[cfg(unix)]
async fn listen_for_signals(shutdown: Shutdown) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "cannot install SIGINT handler");
            return;
        }
    };
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "cannot install SIGTERM handler");
            return;
        }
    };

    tokio::select! {
        _ = interrupt.recv() => info!("SIGINT received; shutting down"),
        _ = terminate.recv() => info!("SIGTERM received; shutting down"),
    }
    shutdown.trigger();
}

#[cfg(not(unix))]
async fn listen_for_signals(shutdown: Shutdown) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("interrupt received; shutting down");
        shutdown.trigger();
    }
}

async fn zombie_scan_loop(
    store: Arc<dyn Store>,
    config: SliceworksConfig,
    own_name: String,
    stop: Shutdown,
) {
    let interval = std::time::Duration::from_secs(config.server.zombie_scan_interval_secs);
    loop {
        if stop.sleep_interruptible(interval).await {
            return;
        }
        if let Err(e) = reap_zombies(store.as_ref(), &config, &own_name).await {
            error!(error = %e, "zombie scan failed");
        }
    }
}

/// Find live-looking server records whose heartbeat has gone stale, delete
/// them, and hand their in-flight jobs and slices back to the queue.
/// Returns how many servers were reaped.
pub async fn reap_zombies(
    store: &dyn Store,
    config: &SliceworksConfig,
    own_name: &str,
) -> Result<usize> {
    let now = Utc::now();
    let threshold = config.zombie_threshold();
    let mut reaped = 0;

    for record in store.servers().await? {
        if record.name == own_name || !record.is_zombie(now, threshold) {
            continue;
        }
        warn!(
            server = %record.name,
            heartbeat = ?record.heartbeat.map(|h| h.updated_at),
            threshold_secs = threshold.num_seconds(),
            "zombie server detected; reclaiming its work"
        );
        let slices = store.requeue_running_slices(&record.name).await?;
        let jobs = store.requeue_running_jobs(&record.name).await?;
        store.delete_server(&record.name).await?;
        info!(
            server = %record.name,
            requeued_slices = slices,
            requeued_jobs = jobs,
            "zombie server reaped"
        );
        reaped += 1;
    }
    Ok(reaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::models::{Heartbeat, Job, Record, ServerRecord, Slice};
    use crate::state_machine::{JobState, ServerState, SliceState};
    use crate::store::{CollectionId, JobStore, MemoryStore, ServerStore, SliceStoreBackend};
    use chrono::Duration;

    fn config_10s_interval() -> SliceworksConfig {
        let mut config = SliceworksConfig::default();
        config.server.heartbeat_interval_secs = 10;
        config.server.missed_heartbeat_threshold = 4;
        config
    }

    async fn seed_zombie(store: &MemoryStore, staleness_secs: i64) -> (String, uuid::Uuid, CollectionId) {
        let mut record = ServerRecord::new(2);
        record.name = "deadhost:42".into();
        record.hostname = "deadhost".into();
        record.state = ServerState::Running;
        record.heartbeat = Some(Heartbeat {
            updated_at: Utc::now() - Duration::seconds(staleness_secs),
            worker_count: 2,
        });
        store.upsert_server(&record).await.unwrap();

        // A job and a slice claimed by its worker 0.
        let worker = record.worker_name(0);
        let job = Job::new("imports::invoices");
        let job_id = job.id;
        store.insert_job(job).await.unwrap();
        store.claim_next_job(&worker, Utc::now()).await.unwrap();

        let collection = CollectionId::input(job_id, "main");
        let slice = Slice::build(1, 1, vec![Record::from("r")], &Codec::plain()).unwrap();
        store.insert_slice(&collection, slice).await.unwrap();
        store.claim_next_slice(&collection, &worker).await.unwrap();

        (record.name, job_id, collection)
    }

    #[tokio::test]
    async fn stale_heartbeat_server_is_reaped_and_work_requeued() {
        let store = MemoryStore::new();
        let config = config_10s_interval();
        // 45s stale against a 40s threshold.
        let (name, job_id, collection) = seed_zombie(&store, 45).await;

        let reaped = reap_zombies(&store, &config, "livehost:1").await.unwrap();
        assert_eq!(reaped, 1);

        assert!(store.servers().await.unwrap().is_empty());
        let job = store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert!(job.worker_name.is_none());
        let counts = store.slice_counts_by_state(&collection).await.unwrap();
        assert_eq!(counts.get(&SliceState::Queued), Some(&1));
        assert_eq!(name, "deadhost:42");
    }

    #[tokio::test]
    async fn fresh_server_is_left_alone() {
        let store = MemoryStore::new();
        let config = config_10s_interval();
        // 35s stale: within the 40s allowance.
        let (_, job_id, _) = seed_zombie(&store, 35).await;

        let reaped = reap_zombies(&store, &config, "livehost:1").await.unwrap();
        assert_eq!(reaped, 0);
        assert_eq!(store.servers().await.unwrap().len(), 1);
        assert_eq!(
            store.get_job(job_id).await.unwrap().unwrap().state,
            JobState::Running
        );
    }

    #[tokio::test]
    async fn own_record_is_never_reaped() {
        let store = MemoryStore::new();
        let config = config_10s_interval();
        let (name, _, _) = seed_zombie(&store, 120).await;

        let reaped = reap_zombies(&store, &config, &name).await.unwrap();
        assert_eq!(reaped, 0);
        assert_eq!(store.servers().await.unwrap().len(), 1);
    }
}
