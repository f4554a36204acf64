use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{IF_MATCH, IF_NONE_MATCH};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::model::{Brief, ManualTask, Phase, Run, RunStatus, TaskState};
use crate::store::{RunStore, TaskResolution};

/// [`RunStore`] backed by a remote document service.
///
/// Runs live at `/runs/{id}` and tasks at `/tasks/{id}`. Writes that must
/// not race a concurrent create or delete use conditional PUTs: `If-None-Match: *`
/// makes an insert create-only, `If-Match: *` makes an update refuse to
/// resurrect a deleted document.
pub struct RemoteStore {
    http: reqwest::Client,
    base: String,
}

impl RemoteStore {
    pub fn new(base: impl Into<String>) -> Result<Self, StoreError> {
        let base = base.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder().build()?;
        Ok(Self { http, base })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn fetch_run_doc(&self, id: Uuid) -> Result<Option<RunDoc>, StoreError> {
        let response = self
            .http
            .get(self.url(&format!("/runs/{id}")))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(backend_error("get run", response).await);
        }
        Ok(Some(response.json().await?))
    }

    async fn open_tasks(&self, run_id: Uuid) -> Result<Vec<ManualTask>, StoreError> {
        let response = self
            .http
            .get(self.url("/tasks"))
            .query(&[("run_id", run_id.to_string()), ("state", "open".into())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(backend_error("list open tasks", response).await);
        }
        let mut tasks: Vec<ManualTask> = response.json().await?;
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn put_task(&self, task: &ManualTask) -> Result<(), StoreError> {
        let response = self
            .http
            .put(self.url(&format!("/tasks/{}", task.id)))
            .json(task)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(backend_error("put task", response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl RunStore for RemoteStore {
    async fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        let response = self
            .http
            .put(self.url(&format!("/runs/{}", run.id)))
            .header(IF_NONE_MATCH, "*")
            .json(&RunDoc::from_run(run))
            .send()
            .await?;
        let status = response.status();
        // Precondition failure means the run already exists; retries stay safe.
        if status.is_success() || status == StatusCode::PRECONDITION_FAILED {
            return Ok(());
        }
        Err(backend_error("create run", response).await)
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, StoreError> {
        match self.fetch_run_doc(id).await? {
            Some(doc) => {
                let blockers = self.open_tasks(id).await?;
                Ok(Some(doc.into_run(blockers)))
            }
            None => Ok(None),
        }
    }

    async fn list_runs(&self) -> Result<Vec<Run>, StoreError> {
        let response = self.http.get(self.url("/runs")).send().await?;
        if !response.status().is_success() {
            return Err(backend_error("list runs", response).await);
        }
        let mut docs: Vec<RunDoc> = response.json().await?;
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let response = self
            .http
            .get(self.url("/tasks"))
            .query(&[("state", "open")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(backend_error("list open tasks", response).await);
        }
        let tasks: Vec<ManualTask> = response.json().await?;
        let mut open: HashMap<Uuid, Vec<ManualTask>> = HashMap::new();
        for task in tasks {
            open.entry(task.run_id).or_default().push(task);
        }
        for bucket in open.values_mut() {
            bucket.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        }

        Ok(docs
            .into_iter()
            .map(|doc| {
                let blockers = open.remove(&doc.id).unwrap_or_default();
                doc.into_run(blockers)
            })
            .collect())
    }

    async fn update_run(&self, run: &Run) -> Result<(), StoreError> {
        let response = self
            .http
            .put(self.url(&format!("/runs/{}", run.id)))
            .header(IF_MATCH, "*")
            .json(&RunDoc::from_run(run))
            .send()
            .await?;
        let status = response.status();
        // A missing document is a no-op; the conditional PUT must never
        // resurrect a deleted run.
        if status.is_success()
            || status == StatusCode::NOT_FOUND
            || status == StatusCode::PRECONDITION_FAILED
        {
            return Ok(());
        }
        Err(backend_error("update run", response).await)
    }

    async fn add_manual_task(&self, task: &ManualTask) -> Result<(), StoreError> {
        // Run existence gates the write so orphan tasks cannot appear.
        if self.fetch_run_doc(task.run_id).await?.is_none() {
            return Ok(());
        }
        self.put_task(task).await
    }

    async fn complete_manual_task(
        &self,
        run_id: Uuid,
        task_id: Uuid,
    ) -> Result<TaskResolution, StoreError> {
        let response = self
            .http
            .get(self.url(&format!("/tasks/{task_id}")))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(TaskResolution::UnknownTask);
        }
        if !response.status().is_success() {
            return Err(backend_error("get task", response).await);
        }
        let mut task: ManualTask = response.json().await?;
        if task.run_id != run_id {
            return Ok(TaskResolution::UnknownTask);
        }
        if task.state != TaskState::Open {
            return Ok(TaskResolution::AlreadyCompleted);
        }

        task.state = TaskState::Completed;
        task.completed_at = Some(Utc::now());
        self.put_task(&task).await?;
        Ok(TaskResolution::Completed)
    }

    async fn cancel_open_tasks(&self, run_id: Uuid) -> Result<u64, StoreError> {
        let mut cancelled = 0u64;
        for mut task in self.open_tasks(run_id).await? {
            task.state = TaskState::Cancelled;
            self.put_task(&task).await?;
            cancelled += 1;
        }
        Ok(cancelled)
    }

    async fn delete_run(&self, id: Uuid) -> Result<bool, StoreError> {
        // Tasks go first so a partial failure never leaves a run whose
        // blockers cannot be derived.
        let response = self
            .http
            .delete(self.url("/tasks"))
            .query(&[("run_id", id.to_string())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(backend_error("delete tasks", response).await);
        }

        let response = self
            .http
            .delete(self.url(&format!("/runs/{id}")))
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            return Err(backend_error("delete run", response).await);
        }
        Ok(true)
    }
}

/// Run document as the remote service stores it. Blockers are derived from
/// the task collection, never embedded in the run document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunDoc {
    id: Uuid,
    status: RunStatus,
    phase: Phase,
    brief: Brief,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RunDoc {
    fn from_run(run: &Run) -> Self {
        Self {
            id: run.id,
            status: run.status,
            phase: run.phase,
            brief: run.brief.clone(),
            created_at: run.created_at,
            updated_at: run.updated_at,
        }
    }

    fn into_run(self, blockers: Vec<ManualTask>) -> Run {
        Run {
            id: self.id,
            status: self.status,
            phase: self.phase,
            brief: self.brief,
            blockers,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

async fn backend_error(context: &str, response: reqwest::Response) -> StoreError {
    let status = response.status().as_u16();
    let message = response
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|v| v.get("error").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| format!("HTTP {status}"));
    StoreError::Backend {
        status,
        context: context.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BriefConstraints, TaskType};

    fn sample_run() -> Run {
        Run::new(
            Brief {
                industry: "hypercasual".to_string(),
                theme: "tower stack".to_string(),
                audience: None,
                goal: "Find the next prototype".to_string(),
                constraints: BriefConstraints::default(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let store = RemoteStore::new("http://127.0.0.1:9/").unwrap();
        assert_eq!(store.url("/runs"), "http://127.0.0.1:9/runs");
    }

    #[test]
    fn test_run_doc_strips_and_reattaches_blockers() {
        let mut run = sample_run();
        run.blockers.push(ManualTask::new(
            run.id,
            Phase::Qa,
            TaskType::QaVerification,
            "Check it",
            "",
            Utc::now(),
        ));

        let doc = RunDoc::from_run(&run);
        let encoded = serde_json::to_value(&doc).unwrap();
        assert!(encoded.get("blockers").is_none());

        let rebuilt = doc.into_run(run.blockers.clone());
        assert_eq!(rebuilt.id, run.id);
        assert_eq!(rebuilt.brief, run.brief);
        assert_eq!(rebuilt.blockers.len(), 1);
    }

    #[test]
    fn test_run_doc_serializes_enums_as_snake_case() {
        let doc = RunDoc::from_run(&sample_run());
        let encoded = serde_json::to_value(&doc).unwrap();
        assert_eq!(encoded["status"], "queued");
        assert_eq!(encoded["phase"], "market");
    }
}
