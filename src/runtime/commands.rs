//! Operator commands delivered to running servers.

use crate::models::ServerRecord;

/// An instruction for one or more servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    /// Stop claiming work; keep heartbeating.
    Pause,
    Resume,
    /// Graceful shutdown: drain in-flight work, then exit.
    Stop,
    /// Re-read worker count from configuration and reconcile the pool.
    Refresh,
    /// Log a diagnostic snapshot of every worker.
    ThreadDump,
    /// Swap the active log filter, e.g. `"debug"` or `"sliceworks=trace"`.
    SetLogLevel(String),
}

/// Targets a command at a subset of servers. Unset fields match anything, so
/// the default filter addresses the whole fleet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandFilter {
    pub server_name: Option<String>,
    pub hostname: Option<String>,
    pub pid: Option<u32>,
}

impl CommandFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_server(name: impl Into<String>) -> Self {
        Self {
            server_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn for_host(hostname: impl Into<String>) -> Self {
        Self {
            hostname: Some(hostname.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, server: &ServerRecord) -> bool {
        self.server_name
            .as_deref()
            .map_or(true, |name| name == server.name)
            && self
                .hostname
                .as_deref()
                .map_or(true, |host| host == server.hostname)
            && self.pid.map_or(true, |pid| pid == server.pid)
    }
}

/// A command plus its addressing, as carried on a server's inbox.
#[derive(Debug, Clone)]
pub struct CommandEnvelope {
    pub command: ServerCommand,
    pub filter: CommandFilter,
}

impl CommandEnvelope {
    pub fn broadcast(command: ServerCommand) -> Self {
        Self {
            command,
            filter: CommandFilter::all(),
        }
    }

    pub fn targeted(command: ServerCommand, filter: CommandFilter) -> Self {
        Self { command, filter }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matching() {
        let server = ServerRecord::new(4);

        assert!(CommandFilter::all().matches(&server));
        assert!(CommandFilter::for_server(server.name.clone()).matches(&server));
        assert!(!CommandFilter::for_server("otherhost:999").matches(&server));
        assert!(CommandFilter::for_host(server.hostname.clone()).matches(&server));

        let wrong_pid = CommandFilter {
            hostname: Some(server.hostname.clone()),
            pid: Some(server.pid.wrapping_add(1)),
            ..CommandFilter::default()
        };
        assert!(!wrong_pid.matches(&server));
    }
}
