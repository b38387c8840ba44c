use serde::{Deserialize, Serialize};

/// Events that can trigger job state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEvent {
    Start,
    Pause,
    Resume,
    Complete,
    Fail,
    Abort,
    Retry,
}

impl JobEvent {
    /// Event name as registered in the transition table.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Abort => "abort",
            Self::Retry => "retry",
        }
    }
}

/// Events that can trigger slice state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceEvent {
    Start,
    Complete,
    Fail,
    Retry,
}

impl SliceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Retry => "retry",
        }
    }
}
