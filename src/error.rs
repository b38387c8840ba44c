//! Crate-wide error taxonomy.
//!
//! Mirrors the failure model of the engine: configuration problems are
//! rejected before anything is persisted, claim races are expected and never
//! treated as errors, and user-logic failures are captured as structured
//! [`JobException`](crate::models::JobException) data rather than crashing a
//! worker.

use thiserror::Error;

/// Top-level error type for all engine operations.
#[derive(Error, Debug)]
pub enum SliceworksError {
    /// Bad configuration or an invalid entity, rejected before persistence.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A state-machine event was fired from a state it is not declared for.
    #[error("Invalid transition: event '{event}' cannot fire from state '{from}'")]
    InvalidTransition { event: String, from: String },

    /// Lost a race on an atomic conditional update. Expected under
    /// concurrency; callers retry or treat it as a no-op.
    #[error("Claim conflict: {0}")]
    ClaimConflict(String),

    /// User-supplied job logic raised while processing a unit of work.
    #[error("Execution failure in {class_name}: {message}")]
    Execution { class_name: String, message: String },

    /// Encode/decode failure on a slice payload.
    #[error("Codec error: {0}")]
    Codec(String),

    /// The persistent store (or another piece of infrastructure) failed.
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SliceworksError {
    /// Claim conflicts are expected under concurrency and must never be
    /// logged at error level.
    pub fn is_claim_conflict(&self) -> bool {
        matches!(self, Self::ClaimConflict(_))
    }
}

pub type Result<T> = std::result::Result<T, SliceworksError>;
