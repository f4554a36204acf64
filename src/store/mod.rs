//! Durable run state behind one contract with three interchangeable
//! backends.
//!
//! Every backend satisfies the same semantics: idempotent run creation,
//! reads that attach the run's currently open blockers (a derived view,
//! never a stored array), upsert task writes, and idempotent task
//! completion. `tests/store_contract.rs` drives the identical suite
//! against all three.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::errors::StoreError;
use crate::model::{ManualTask, Run};

pub mod memory;
pub mod remote;
pub mod sqlite;

pub use memory::MemoryStore;
pub use remote::RemoteStore;
pub use sqlite::SqliteStore;

/// What completing a task actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResolution {
    /// The task was open and is now completed.
    Completed,
    /// The task had already been completed or cancelled; nothing changed.
    AlreadyCompleted,
    /// No task with that id belongs to that run.
    UnknownTask,
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Idempotent insert. A duplicate id is a silent no-op so transport
    /// retries stay safe.
    async fn create_run(&self, run: &Run) -> Result<(), StoreError>;

    /// The run with its currently open blockers attached.
    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, StoreError>;

    /// All runs, newest created first, each with open blockers attached.
    async fn list_runs(&self) -> Result<Vec<Run>, StoreError>;

    /// Full replace of the mutable fields (status, phase, brief,
    /// updated_at). Must not resurrect a deleted run: a missing id is a
    /// no-op, never an insert.
    async fn update_run(&self, run: &Run) -> Result<(), StoreError>;

    /// Upsert by task id. A task whose run does not exist is silently
    /// dropped; orphan tasks never enter the store.
    async fn add_manual_task(&self, task: &ManualTask) -> Result<(), StoreError>;

    /// Mark a task completed. The three [`TaskResolution`] outcomes are
    /// ordinary results, not errors; transport failures are.
    async fn complete_manual_task(
        &self,
        run_id: Uuid,
        task_id: Uuid,
    ) -> Result<TaskResolution, StoreError>;

    /// Cancel every open task on a run, returning how many flipped.
    async fn cancel_open_tasks(&self, run_id: Uuid) -> Result<u64, StoreError>;

    /// Remove the run and all its tasks. `false` when the id was absent.
    async fn delete_run(&self, id: Uuid) -> Result<bool, StoreError>;
}

/// Build the backend the configuration selects. Called once at startup;
/// the returned handle is shared process-wide.
pub fn connect(config: &StoreConfig) -> Result<Arc<dyn RunStore>, StoreError> {
    match config {
        StoreConfig::Remote { url } => {
            tracing::info!(url = %url, "using remote document store");
            Ok(Arc::new(RemoteStore::new(url.clone())?))
        }
        StoreConfig::Sqlite { path } => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            tracing::info!(path = %path.display(), "using sqlite store");
            Ok(Arc::new(SqliteStore::open(path)?))
        }
        StoreConfig::Memory => {
            tracing::info!("using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
