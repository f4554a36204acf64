//! Process-local backend for tests, development, and the
//! no-configuration fallback.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RunStore, TaskResolution};
use crate::errors::StoreError;
use crate::model::{ManualTask, Run, TaskState};

/// One run's persisted shape: the record plus its owned tasks. The
/// blocker view is recomputed from the task list on every read.
#[derive(Debug, Clone)]
struct RunRecord {
    run: Run,
    tasks: Vec<ManualTask>,
}

/// In-memory store. Values are cloned on every read and write so no
/// caller ever holds an alias into store-owned state.
pub struct MemoryStore {
    runs: RwLock<HashMap<Uuid, RunRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }

    fn view(record: &RunRecord) -> Run {
        let mut run = record.run.clone();
        run.blockers = record
            .tasks
            .iter()
            .filter(|task| task.state == TaskState::Open)
            .cloned()
            .collect();
        run
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        runs.entry(run.id).or_insert_with(|| {
            let mut stored = run.clone();
            stored.blockers = Vec::new();
            RunRecord {
                run: stored,
                tasks: Vec::new(),
            }
        });
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, StoreError> {
        let runs = self.runs.read().await;
        Ok(runs.get(&id).map(Self::view))
    }

    async fn list_runs(&self) -> Result<Vec<Run>, StoreError> {
        let runs = self.runs.read().await;
        let mut all: Vec<Run> = runs.values().map(Self::view).collect();
        all.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(all)
    }

    async fn update_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        if let Some(record) = runs.get_mut(&run.id) {
            record.run.status = run.status;
            record.run.phase = run.phase;
            record.run.brief = run.brief.clone();
            record.run.updated_at = run.updated_at;
        }
        Ok(())
    }

    async fn add_manual_task(&self, task: &ManualTask) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        if let Some(record) = runs.get_mut(&task.run_id) {
            match record.tasks.iter_mut().find(|t| t.id == task.id) {
                Some(existing) => *existing = task.clone(),
                None => record.tasks.push(task.clone()),
            }
        }
        Ok(())
    }

    async fn complete_manual_task(
        &self,
        run_id: Uuid,
        task_id: Uuid,
    ) -> Result<TaskResolution, StoreError> {
        let mut runs = self.runs.write().await;
        let Some(record) = runs.get_mut(&run_id) else {
            return Ok(TaskResolution::UnknownTask);
        };
        let Some(task) = record.tasks.iter_mut().find(|t| t.id == task_id) else {
            return Ok(TaskResolution::UnknownTask);
        };
        if task.state != TaskState::Open {
            return Ok(TaskResolution::AlreadyCompleted);
        }
        task.state = TaskState::Completed;
        task.completed_at = Some(Utc::now());
        Ok(TaskResolution::Completed)
    }

    async fn cancel_open_tasks(&self, run_id: Uuid) -> Result<u64, StoreError> {
        let mut runs = self.runs.write().await;
        let Some(record) = runs.get_mut(&run_id) else {
            return Ok(0);
        };
        let mut cancelled = 0;
        for task in record
            .tasks
            .iter_mut()
            .filter(|t| t.state == TaskState::Open)
        {
            task.state = TaskState::Cancelled;
            cancelled += 1;
        }
        Ok(cancelled)
    }

    async fn delete_run(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut runs = self.runs.write().await;
        Ok(runs.remove(&id).is_some())
    }
}
