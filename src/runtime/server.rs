//! Server process: owns the worker pool, persists its own record, and keeps
//! it alive with heartbeats until told to stop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::SliceworksConfig;
use crate::error::Result;
use crate::logging;
use crate::models::{Heartbeat, ServerRecord};
use crate::state_machine::ServerState;
use crate::store::Store;

use super::commands::{CommandEnvelope, ServerCommand};
use super::registry::BehaviorRegistry;
use super::shutdown::Shutdown;
use super::worker::Worker;

struct WorkerHandle {
    name: String,
    status: Arc<Mutex<String>>,
    join: JoinHandle<()>,
}

/// One server process: a persisted [`ServerRecord`], a pool of worker tasks,
/// a heartbeat loop, and a command inbox.
///
/// The pool has its own stop token, separate from process shutdown, so pause
/// and refresh can cycle workers while the server itself keeps heartbeating.
pub struct Server {
    record: ServerRecord,
    store: Arc<dyn Store>,
    config: SliceworksConfig,
    registry: Arc<BehaviorRegistry>,
    shutdown: Shutdown,
    commands: mpsc::Receiver<CommandEnvelope>,
    workers: Vec<WorkerHandle>,
    pool_stop: Shutdown,
}

impl Server {
    pub fn new(
        store: Arc<dyn Store>,
        config: SliceworksConfig,
        registry: Arc<BehaviorRegistry>,
        shutdown: Shutdown,
        commands: mpsc::Receiver<CommandEnvelope>,
    ) -> Self {
        let record = ServerRecord::new(config.server.max_workers);
        Self {
            record,
            store,
            config,
            registry,
            shutdown,
            commands,
            workers: Vec::new(),
            pool_stop: Shutdown::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Register, spawn the pool, and run until shutdown or a `Stop` command;
    /// then drain and deregister.
    pub async fn run(mut self) -> Result<()> {
        info!(server = %self.record.name, max_workers = self.record.max_workers, "server starting");
        self.store.upsert_server(&self.record).await?;

        self.spawn_workers();
        self.record.state = ServerState::Running;
        self.store
            .update_server_state(&self.record.name, ServerState::Running)
            .await?;
        self.write_heartbeat().await?;

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        enum Wakeup {
            Heartbeat,
            Command(Option<CommandEnvelope>),
            Shutdown,
        }

        loop {
            let wakeup = tokio::select! {
                _ = heartbeat.tick() => Wakeup::Heartbeat,
                envelope = self.commands.recv() => Wakeup::Command(envelope),
                _ = self.shutdown.wait() => Wakeup::Shutdown,
            };
            match wakeup {
                Wakeup::Heartbeat => {
                    if let Err(e) = self.write_heartbeat().await {
                        error!(server = %self.record.name, error = %e, "heartbeat write failed");
                    }
                }
                Wakeup::Command(Some(envelope)) => {
                    if self.handle_command(envelope).await? {
                        break;
                    }
                }
                // Inbox closed or shutdown: stop.
                Wakeup::Command(None) | Wakeup::Shutdown => break,
            }
        }

        self.stop().await
    }

    async fn handle_command(&mut self, envelope: CommandEnvelope) -> Result<bool> {
        if !envelope.filter.matches(&self.record) {
            return Ok(false);
        }
        info!(server = %self.record.name, command = ?envelope.command, "command received");
        match envelope.command {
            ServerCommand::Pause => self.pause().await?,
            ServerCommand::Resume => self.resume().await?,
            ServerCommand::Stop => return Ok(true),
            ServerCommand::Refresh => self.refresh().await?,
            ServerCommand::ThreadDump => self.thread_dump(),
            ServerCommand::SetLogLevel(directive) => {
                if let Err(e) = logging::set_level(&directive) {
                    warn!(server = %self.record.name, error = %e, "log level change rejected");
                }
            }
        }
        Ok(false)
    }

    fn spawn_workers(&mut self) {
        let target = self.record.max_workers;
        for index in self.workers.len()..target {
            let name = self.record.worker_name(index);
            let worker = Worker::new(
                name.clone(),
                Arc::clone(&self.store),
                self.config.clone(),
                Arc::clone(&self.registry),
                self.pool_stop.clone(),
            );
            let status = worker.status_handle();
            self.workers.push(WorkerHandle {
                name,
                status,
                join: tokio::spawn(worker.run()),
            });
        }
        info!(server = %self.record.name, workers = self.workers.len(), "worker pool running");
    }

    async fn pause(&mut self) -> Result<()> {
        if self.record.state == ServerState::Paused {
            return Ok(());
        }
        self.stop_pool().await;
        self.record.state = ServerState::Paused;
        self.store
            .update_server_state(&self.record.name, ServerState::Paused)
            .await
    }

    async fn resume(&mut self) -> Result<()> {
        if self.record.state != ServerState::Paused {
            return Ok(());
        }
        self.pool_stop = Shutdown::new();
        self.spawn_workers();
        self.record.state = ServerState::Running;
        self.store
            .update_server_state(&self.record.name, ServerState::Running)
            .await
    }

    /// Re-read configuration and reconcile the pool to the new worker count.
    async fn refresh(&mut self) -> Result<()> {
        let reloaded = match SliceworksConfig::load() {
            Ok(config) => config,
            Err(e) => {
                warn!(server = %self.record.name, error = %e, "config reload failed; keeping current settings");
                return Ok(());
            }
        };
        let target = reloaded.server.max_workers;
        self.config = reloaded;
        if target == self.record.max_workers {
            return Ok(());
        }
        info!(
            server = %self.record.name,
            from = self.record.max_workers,
            to = target,
            "reconciling worker pool"
        );
        let was_running = self.record.state == ServerState::Running;
        self.stop_pool().await;
        self.record.max_workers = target;
        self.store.upsert_server(&self.record).await?;
        if was_running {
            self.pool_stop = Shutdown::new();
            self.spawn_workers();
        }
        Ok(())
    }

    /// Log a diagnostic line per worker.
    fn thread_dump(&self) {
        for handle in &self.workers {
            info!(
                server = %self.record.name,
                worker = %handle.name,
                status = %handle.status.lock(),
                finished = handle.join.is_finished(),
                "worker dump"
            );
        }
    }

    async fn stop(mut self) -> Result<()> {
        info!(server = %self.record.name, "server stopping");
        self.record.state = ServerState::Stopping;
        self.store
            .update_server_state(&self.record.name, ServerState::Stopping)
            .await?;

        self.stop_pool().await;

        // A worker abandoned at the drain deadline can leave its claims
        // running under our name, and zombie reaping only walks server
        // records. Hand that work back before the record disappears.
        let slices = self.store.requeue_running_slices(&self.record.name).await?;
        let jobs = self.store.requeue_running_jobs(&self.record.name).await?;
        if slices > 0 || jobs > 0 {
            warn!(
                server = %self.record.name,
                requeued_slices = slices,
                requeued_jobs = jobs,
                "requeued work abandoned by undrained workers"
            );
        }

        self.store.delete_server(&self.record.name).await?;
        info!(server = %self.record.name, "server stopped");
        Ok(())
    }

    /// Stop every worker, waiting up to the drain timeout per pool while
    /// still heartbeating so the drain itself is not mistaken for death.
    async fn stop_pool(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.pool_stop.trigger();

        let deadline = tokio::time::Instant::now() + self.config.drain_timeout();
        let heartbeat_every = self.config.heartbeat_interval().min(Duration::from_secs(5));
        let draining: Vec<WorkerHandle> = self.workers.drain(..).collect();
        for handle in draining {
            let mut join = handle.join;
            loop {
                if tokio::time::Instant::now() >= deadline {
                    warn!(
                        server = %self.record.name,
                        worker = %handle.name,
                        status = %handle.status.lock(),
                        "worker did not drain in time; abandoning it"
                    );
                    join.abort();
                    break;
                }
                tokio::select! {
                    _ = &mut join => break,
                    _ = tokio::time::sleep(heartbeat_every) => {
                        if let Err(e) = self.write_heartbeat().await {
                            warn!(server = %self.record.name, error = %e, "heartbeat during drain failed");
                        }
                    }
                }
            }
        }
    }

    async fn write_heartbeat(&self) -> Result<()> {
        let live = self
            .workers
            .iter()
            .filter(|handle| !handle.join.is_finished())
            .count();
        self.store
            .write_heartbeat(
                &self.record.name,
                Heartbeat {
                    updated_at: Utc::now(),
                    worker_count: live,
                },
            )
            .await
    }
}
