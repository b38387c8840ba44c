use serde::{Deserialize, Serialize};
use std::fmt;

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to be claimed by a worker.
    #[default]
    Queued,
    /// Claimed and executing.
    Running,
    /// Held back from claiming until resumed.
    Paused,
    /// Terminal failure (until a retry requeues it).
    Failed,
    /// Terminal, cancelled by an operator or policy.
    Aborted,
    /// Terminal success.
    Completed,
}

impl JobState {
    /// Terminal states admit no further work (abort excepted).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }

    /// States that count against a singleton's "already active" check.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Running | Self::Paused)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Failed => write!(f, "failed"),
            Self::Aborted => write!(f, "aborted"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "failed" => Ok(Self::Failed),
            "aborted" => Ok(Self::Aborted),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid job state: {s}")),
        }
    }
}

/// Slice lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SliceState {
    #[default]
    Queued,
    Running,
    Completed,
    Failed,
}

impl SliceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for SliceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for SliceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid slice state: {s}")),
        }
    }
}

/// Server process states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    #[default]
    Starting,
    Running,
    Paused,
    Stopping,
}

impl ServerState {
    /// A zombie scan only considers servers that claim to be alive.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Stopping)
    }

    /// Whether the management loop may legally begin a graceful stop.
    pub fn may_stop(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_classification() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Aborted.is_terminal());
        assert!(!JobState::Running.is_terminal());

        assert!(JobState::Queued.is_active());
        assert!(JobState::Paused.is_active());
        assert!(!JobState::Completed.is_active());
    }

    #[test]
    fn server_state_liveness() {
        assert!(ServerState::Running.is_live());
        assert!(ServerState::Stopping.is_live());
        assert!(!ServerState::Starting.is_live());
        assert!(ServerState::Paused.may_stop());
        assert!(!ServerState::Stopping.may_stop());
    }

    #[test]
    fn state_string_round_trip() {
        assert_eq!(JobState::Running.to_string(), "running");
        assert_eq!("aborted".parse::<JobState>().unwrap(), JobState::Aborted);
        assert_eq!(SliceState::Failed.to_string(), "failed");
        assert_eq!("queued".parse::<SliceState>().unwrap(), SliceState::Queued);
        assert!("bogus".parse::<JobState>().is_err());
    }

    #[test]
    fn state_serde() {
        let json = serde_json::to_string(&JobState::Paused).unwrap();
        assert_eq!(json, "\"paused\"");
        let parsed: JobState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, JobState::Paused);
    }
}
