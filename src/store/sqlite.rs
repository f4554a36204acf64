use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::model::{Brief, ManualTask, Run};
use crate::store::{RunStore, TaskResolution};

/// SQLite-backed [`RunStore`].
///
/// The connection lives behind `Arc<Mutex>` and every query runs on tokio's
/// blocking thread pool via `call`, keeping synchronous SQLite I/O off the
/// async worker threads.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<Mutex<RunDb>>,
}

impl SqliteStore {
    /// Open (or create) the database file at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::wrap(RunDb::open(path)?))
    }

    /// Private in-memory database. Used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::wrap(RunDb::open_in_memory()?))
    }

    fn wrap(db: RunDb) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    /// Run a closure against the database on a blocking thread.
    /// Everything moved into `f` must be owned (`'static`).
    async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&RunDb) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
    }
}

#[async_trait]
impl RunStore for SqliteStore {
    async fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        let run = run.clone();
        self.call(move |db| db.create_run(&run)).await
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, StoreError> {
        self.call(move |db| db.get_run(id)).await
    }

    async fn list_runs(&self) -> Result<Vec<Run>, StoreError> {
        self.call(|db| db.list_runs()).await
    }

    async fn update_run(&self, run: &Run) -> Result<(), StoreError> {
        let run = run.clone();
        self.call(move |db| db.update_run(&run)).await
    }

    async fn add_manual_task(&self, task: &ManualTask) -> Result<(), StoreError> {
        let task = task.clone();
        self.call(move |db| db.add_manual_task(&task)).await
    }

    async fn complete_manual_task(
        &self,
        run_id: Uuid,
        task_id: Uuid,
    ) -> Result<TaskResolution, StoreError> {
        self.call(move |db| db.complete_manual_task(run_id, task_id))
            .await
    }

    async fn cancel_open_tasks(&self, run_id: Uuid) -> Result<u64, StoreError> {
        self.call(move |db| db.cancel_open_tasks(run_id)).await
    }

    async fn delete_run(&self, id: Uuid) -> Result<bool, StoreError> {
        self.call(move |db| db.delete_run(id)).await
    }
}

struct RunDb {
    conn: Connection,
}

impl RunDb {
    fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Self {
            conn: Connection::open(path)?,
        };
        db.init()?;
        Ok(db)
    }

    fn open_in_memory() -> Result<Self, StoreError> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<(), StoreError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                phase TEXT NOT NULL,
                brief TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS manual_tasks (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                phase TEXT NOT NULL,
                task_type TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL DEFAULT 'open',
                created_at TEXT NOT NULL,
                due_at TEXT,
                completed_at TEXT,
                assignee TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_manual_tasks_run ON manual_tasks(run_id);
            CREATE INDEX IF NOT EXISTS idx_manual_tasks_state ON manual_tasks(run_id, state);
            ",
        )?;
        Ok(())
    }

    fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO runs (id, status, phase, brief, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO NOTHING",
            params![
                run.id.to_string(),
                run.status.as_str(),
                run.phase.as_str(),
                encode_brief(run.id, &run.brief)?,
                run.created_at.to_rfc3339(),
                run.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_run(&self, id: Uuid) -> Result<Option<Run>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, status, phase, brief, created_at, updated_at FROM runs WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id.to_string()], run_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?.into_run(self.open_tasks(id)?)?)),
            None => Ok(None),
        }
    }

    fn list_runs(&self) -> Result<Vec<Run>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, status, phase, brief, created_at, updated_at
             FROM runs ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], run_row)?;
        let mut raw = Vec::new();
        for row in rows {
            raw.push(row?);
        }

        let mut open = self.open_tasks_by_run()?;
        let mut runs = Vec::with_capacity(raw.len());
        for row in raw {
            let blockers = open.remove(&row.id).unwrap_or_default();
            runs.push(row.into_run(blockers)?);
        }
        Ok(runs)
    }

    fn update_run(&self, run: &Run) -> Result<(), StoreError> {
        // Zero rows touched means the run was deleted; never re-insert.
        self.conn.execute(
            "UPDATE runs SET status = ?2, phase = ?3, brief = ?4, updated_at = ?5 WHERE id = ?1",
            params![
                run.id.to_string(),
                run.status.as_str(),
                run.phase.as_str(),
                encode_brief(run.id, &run.brief)?,
                run.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn add_manual_task(&self, task: &ManualTask) -> Result<(), StoreError> {
        let run_exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM runs WHERE id = ?1)",
            params![task.run_id.to_string()],
            |row| row.get(0),
        )?;
        if !run_exists {
            return Ok(());
        }
        // Upsert by task id. run_id and created_at are identity, never updated.
        self.conn.execute(
            "INSERT INTO manual_tasks
                 (id, run_id, phase, task_type, title, description, state,
                  created_at, due_at, completed_at, assignee)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                phase = excluded.phase,
                task_type = excluded.task_type,
                title = excluded.title,
                description = excluded.description,
                state = excluded.state,
                due_at = excluded.due_at,
                completed_at = excluded.completed_at,
                assignee = excluded.assignee",
            params![
                task.id.to_string(),
                task.run_id.to_string(),
                task.phase.as_str(),
                task.task_type.as_str(),
                task.title,
                task.description,
                task.state.as_str(),
                task.created_at.to_rfc3339(),
                task.due_at.map(|t| t.to_rfc3339()),
                task.completed_at.map(|t| t.to_rfc3339()),
                task.assignee,
            ],
        )?;
        Ok(())
    }

    fn complete_manual_task(
        &self,
        run_id: Uuid,
        task_id: Uuid,
    ) -> Result<TaskResolution, StoreError> {
        let changed = self.conn.execute(
            "UPDATE manual_tasks SET state = 'completed', completed_at = ?3
             WHERE id = ?1 AND run_id = ?2 AND state = 'open'",
            params![
                task_id.to_string(),
                run_id.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        if changed > 0 {
            return Ok(TaskResolution::Completed);
        }
        let known: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM manual_tasks WHERE id = ?1 AND run_id = ?2)",
            params![task_id.to_string(), run_id.to_string()],
            |row| row.get(0),
        )?;
        if known {
            Ok(TaskResolution::AlreadyCompleted)
        } else {
            Ok(TaskResolution::UnknownTask)
        }
    }

    fn cancel_open_tasks(&self, run_id: Uuid) -> Result<u64, StoreError> {
        let changed = self.conn.execute(
            "UPDATE manual_tasks SET state = 'cancelled' WHERE run_id = ?1 AND state = 'open'",
            params![run_id.to_string()],
        )?;
        Ok(changed as u64)
    }

    fn delete_run(&self, id: Uuid) -> Result<bool, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM manual_tasks WHERE run_id = ?1",
            params![id.to_string()],
        )?;
        let removed = tx.execute("DELETE FROM runs WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn open_tasks(&self, run_id: Uuid) -> Result<Vec<ManualTask>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, phase, task_type, title, description, state,
                    created_at, due_at, completed_at, assignee
             FROM manual_tasks
             WHERE run_id = ?1 AND state = 'open'
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![run_id.to_string()], task_row)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?.into_task()?);
        }
        Ok(tasks)
    }

    fn open_tasks_by_run(&self) -> Result<HashMap<String, Vec<ManualTask>>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, phase, task_type, title, description, state,
                    created_at, due_at, completed_at, assignee
             FROM manual_tasks
             WHERE state = 'open'
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([], task_row)?;
        let mut grouped: HashMap<String, Vec<ManualTask>> = HashMap::new();
        for row in rows {
            let raw = row?;
            grouped
                .entry(raw.run_id.clone())
                .or_default()
                .push(raw.into_task()?);
        }
        Ok(grouped)
    }
}

/// Raw `runs` row. Decoded into a [`Run`] once blockers are attached.
struct RunRow {
    id: String,
    status: String,
    phase: String,
    brief: String,
    created_at: String,
    updated_at: String,
}

impl RunRow {
    fn into_run(self, blockers: Vec<ManualTask>) -> Result<Run, StoreError> {
        Ok(Run {
            id: parse_uuid(&self.id)?,
            status: self.status.parse().map_err(StoreError::Decode)?,
            phase: self.phase.parse().map_err(StoreError::Decode)?,
            brief: serde_json::from_str(&self.brief)
                .map_err(|e| StoreError::Decode(format!("bad brief json: {e}")))?,
            blockers,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn run_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        id: row.get(0)?,
        status: row.get(1)?,
        phase: row.get(2)?,
        brief: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Raw `manual_tasks` row.
struct TaskRow {
    id: String,
    run_id: String,
    phase: String,
    task_type: String,
    title: String,
    description: String,
    state: String,
    created_at: String,
    due_at: Option<String>,
    completed_at: Option<String>,
    assignee: Option<String>,
}

impl TaskRow {
    fn into_task(self) -> Result<ManualTask, StoreError> {
        Ok(ManualTask {
            id: parse_uuid(&self.id)?,
            run_id: parse_uuid(&self.run_id)?,
            phase: self.phase.parse().map_err(StoreError::Decode)?,
            task_type: self.task_type.parse().map_err(StoreError::Decode)?,
            title: self.title,
            description: self.description,
            state: self.state.parse().map_err(StoreError::Decode)?,
            created_at: parse_timestamp(&self.created_at)?,
            due_at: self.due_at.as_deref().map(parse_timestamp).transpose()?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            assignee: self.assignee,
        })
    }
}

fn task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        run_id: row.get(1)?,
        phase: row.get(2)?,
        task_type: row.get(3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        state: row.get(6)?,
        created_at: row.get(7)?,
        due_at: row.get(8)?,
        completed_at: row.get(9)?,
        assignee: row.get(10)?,
    })
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Decode(format!("bad uuid {raw:?}: {e}")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode(format!("bad timestamp {raw:?}: {e}")))
}

fn encode_brief(run_id: Uuid, brief: &Brief) -> Result<String, StoreError> {
    serde_json::to_string(brief)
        .map_err(|e| StoreError::Decode(format!("brief for run {run_id} does not serialize: {e}")))
}
