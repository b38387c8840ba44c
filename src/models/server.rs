//! Server records and their embedded heartbeat: the sole liveness signal
//! other processes use to judge a server alive.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::ServerState;

/// Periodic liveness signal embedded in a [`ServerRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub updated_at: DateTime<Utc>,
    pub worker_count: usize,
}

/// Persisted record for one server process.
///
/// Live worker threads are in-memory only and never persisted; the record
/// carries just the identity and supervision fields other processes need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// `host:pid` by default; worker names are prefixed with it, which is
    /// how zombie cleanup finds a dead server's in-flight work.
    pub name: String,
    pub hostname: String,
    pub pid: u32,
    pub state: ServerState,
    pub max_workers: usize,
    pub started_at: DateTime<Utc>,
    pub heartbeat: Option<Heartbeat>,
}

impl ServerRecord {
    pub fn new(max_workers: usize) -> Self {
        let hostname = hostname();
        let pid = std::process::id();
        Self {
            name: format!("{hostname}:{pid}"),
            hostname,
            pid,
            state: ServerState::Starting,
            max_workers,
            started_at: Utc::now(),
            heartbeat: None,
        }
    }

    /// Name for the `index`-th worker owned by this server.
    pub fn worker_name(&self, index: usize) -> String {
        format!("{}:{index}", self.name)
    }

    /// A server is a zombie when it claims to be live but its heartbeat is
    /// missing or older than `threshold` (heartbeat interval x missed count).
    pub fn is_zombie(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        if !self.state.is_live() {
            return false;
        }
        match self.heartbeat {
            None => true,
            Some(heartbeat) => now - heartbeat.updated_at > threshold,
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
