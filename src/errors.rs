//! Typed error hierarchy for the greenlight core.
//!
//! Two top-level enums cover the two subsystems:
//! - `StoreError` — persistence transport failures, regardless of backend
//! - `OrchestratorError` — state machine and caller errors

use thiserror::Error;
use uuid::Uuid;

use crate::model::Phase;

/// Errors from the persistence layer. Backends wrap their transport
/// failures here instead of swallowing them; callers decide retry policy.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Remote store transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Remote store returned {status} for {context}: {message}")]
    Backend {
        status: u16,
        context: String,
        message: String,
    },

    #[error("Corrupt record in store: {0}")]
    Decode(String),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Store worker failed: {0}")]
    Worker(String),
}

/// Errors surfaced by orchestrator operations. One run's failure never
/// affects another run or the process.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid brief: {0}")]
    Validation(String),

    #[error("Run {id} not found")]
    RunNotFound { id: Uuid },

    #[error("Task {task_id} not found on run {run_id}")]
    TaskNotFound { run_id: Uuid, task_id: Uuid },

    #[error("Run {id} is not actionable: {reason}")]
    InvalidState { id: Uuid, reason: String },

    #[error("Agent '{agent}' failed during {phase} phase: {source}")]
    Agent {
        agent: String,
        phase: Phase,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
