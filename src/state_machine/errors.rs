use thiserror::Error;

use crate::error::SliceworksError;

/// Error types for state machine operations.
#[derive(Error, Debug)]
pub enum StateMachineError {
    #[error("Unknown event: {event}")]
    UnknownEvent { event: String },

    #[error("Invalid transition: event '{event}' cannot fire from state '{from}'")]
    InvalidTransition { event: String, from: String },

    #[error("Before-callback aborted event '{event}': {reason}")]
    CallbackFailed { event: String, reason: String },

    #[error("Internal state machine error: {0}")]
    Internal(String),
}

impl From<StateMachineError> for SliceworksError {
    fn from(err: StateMachineError) -> Self {
        match err {
            StateMachineError::InvalidTransition { event, from } => {
                SliceworksError::InvalidTransition { event, from }
            }
            StateMachineError::UnknownEvent { event } => SliceworksError::InvalidTransition {
                event,
                from: "<unknown event>".to_string(),
            },
            StateMachineError::CallbackFailed { event, reason } => {
                SliceworksError::Validation(format!("event '{event}' aborted: {reason}"))
            }
            StateMachineError::Internal(msg) => SliceworksError::Infrastructure(msg),
        }
    }
}
