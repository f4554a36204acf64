//! Run lifecycle: validated intake, gated phase advancement, blocker
//! resolution, and the manual overrides operators reach for when a run
//! goes sideways.
//!
//! Every mutation takes the run's async lock first, so concurrent calls
//! on the same run serialize and the loser observes the winner's state
//! instead of clobbering it.

pub mod transitions;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::agent::{Agent, AgentContext, AgentInput, BlockerRequest, ClockFn};
use crate::errors::OrchestratorError;
use crate::model::{
    AdvanceOutcome, ArtifactRef, Brief, ManualTask, Phase, Run, RunStatus, TaskType,
};
use crate::notify::{Notifier, RunEvent};
use crate::store::{RunStore, TaskResolution};

use transitions::{TransitionKind, transition_for};

/// One async mutex per run id.
///
/// Entries are only dropped when the run is deleted; a racing acquire on
/// a deleted run just observes it gone on the next read.
#[derive(Default)]
struct RunLocks {
    inner: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl RunLocks {
    async fn acquire(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    async fn forget(&self, id: Uuid) {
        self.inner.lock().await.remove(&id);
    }
}

pub struct Orchestrator {
    store: Arc<dyn RunStore>,
    agent: Arc<dyn Agent>,
    notifier: Notifier,
    artifact_dir: PathBuf,
    clock: ClockFn,
    locks: RunLocks,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RunStore>,
        agent: Arc<dyn Agent>,
        notifier: Notifier,
        artifact_dir: impl Into<PathBuf>,
    ) -> Self {
        Self::with_clock(store, agent, notifier, artifact_dir, Utc::now)
    }

    /// Injectable clock for deterministic timestamps in tests.
    pub fn with_clock(
        store: Arc<dyn RunStore>,
        agent: Arc<dyn Agent>,
        notifier: Notifier,
        artifact_dir: impl Into<PathBuf>,
        clock: ClockFn,
    ) -> Self {
        Self {
            store,
            agent,
            notifier,
            artifact_dir: artifact_dir.into(),
            clock,
            locks: RunLocks::default(),
        }
    }

    /// Validate a brief and persist a fresh queued run at the market phase.
    pub async fn create_run(&self, brief: Brief) -> Result<Run, OrchestratorError> {
        brief.validate().map_err(OrchestratorError::Validation)?;
        let run = Run::new(brief, (self.clock)());
        self.store.create_run(&run).await?;

        tracing::info!(run_id = %run.id, industry = %run.brief.industry, "run created");
        self.notifier
            .notify(&RunEvent::RunCreated { run: run.clone() });
        Ok(run)
    }

    pub async fn get_run(&self, id: Uuid) -> Result<Run, OrchestratorError> {
        self.require(id).await
    }

    pub async fn list_runs(&self) -> Result<Vec<Run>, OrchestratorError> {
        Ok(self.store.list_runs().await?)
    }

    /// Move the run through its current phase's exit.
    ///
    /// Advancing a done run is a no-op that returns the run unchanged.
    /// Advancing a blocked, paused, or failed run is an error, as is
    /// advancing a phase with no forward transition.
    pub async fn advance(&self, id: Uuid) -> Result<AdvanceOutcome, OrchestratorError> {
        let _guard = self.locks.acquire(id).await;
        let run = self.require(id).await?;

        if run.status == RunStatus::Done {
            return Ok(outcome_of(run));
        }
        self.ensure_actionable(&run)?;

        let kind = transition_for(run.phase).ok_or_else(|| OrchestratorError::InvalidState {
            id,
            reason: format!("phase {} has no forward transition", run.phase),
        })?;

        match kind {
            TransitionKind::Auto { target } => self.advance_auto(run, target).await,
            TransitionKind::HumanGated { target, gate } => {
                self.advance_gated(run, target, gate, Vec::new(), Vec::new())
                    .await
            }
            TransitionKind::AgentGated { target, gate } => {
                self.advance_agent(run, target, gate).await
            }
            TransitionKind::Terminal => self.finish(run).await,
        }
    }

    /// Complete a blocker. When the last open blocker on a waiting run
    /// closes, the run resumes by itself. Completing an already-completed
    /// task changes nothing and succeeds.
    pub async fn resolve_task(
        &self,
        run_id: Uuid,
        task_id: Uuid,
    ) -> Result<Run, OrchestratorError> {
        let _guard = self.locks.acquire(run_id).await;
        self.require(run_id).await?;

        match self.store.complete_manual_task(run_id, task_id).await? {
            TaskResolution::UnknownTask => {
                return Err(OrchestratorError::TaskNotFound { run_id, task_id });
            }
            TaskResolution::Completed | TaskResolution::AlreadyCompleted => {}
        }

        let mut run = self.require(run_id).await?;
        let resumed = run.status == RunStatus::AwaitingHuman && run.blockers.is_empty();
        if resumed {
            run.status = RunStatus::Running;
            run.updated_at = (self.clock)();
            self.store.update_run(&run).await?;
        }

        tracing::info!(run_id = %run_id, task_id = %task_id, resumed, "task resolved");
        self.notifier.notify(&RunEvent::TaskResolved {
            run_id,
            task_id,
            resumed,
        });
        Ok(run)
    }

    /// Suspend a queued or running run.
    pub async fn pause_run(&self, id: Uuid) -> Result<Run, OrchestratorError> {
        let _guard = self.locks.acquire(id).await;
        let mut run = self.require(id).await?;
        if !run.status.is_actionable() {
            return Err(OrchestratorError::InvalidState {
                id,
                reason: format!("cannot pause while {}", run.status),
            });
        }

        run.status = RunStatus::Paused;
        run.updated_at = (self.clock)();
        self.store.update_run(&run).await?;

        tracing::info!(run_id = %id, "run paused");
        self.notifier.notify(&RunEvent::RunPaused { run_id: id });
        Ok(run)
    }

    pub async fn resume_run(&self, id: Uuid) -> Result<Run, OrchestratorError> {
        let _guard = self.locks.acquire(id).await;
        let mut run = self.require(id).await?;
        if run.status != RunStatus::Paused {
            return Err(OrchestratorError::InvalidState {
                id,
                reason: format!("cannot resume while {}", run.status),
            });
        }

        run.status = RunStatus::Running;
        run.updated_at = (self.clock)();
        self.store.update_run(&run).await?;

        tracing::info!(run_id = %id, "run resumed");
        self.notifier.notify(&RunEvent::RunResumed { run_id: id });
        Ok(run)
    }

    /// Abort a run. Open blockers are cancelled before the status flips,
    /// so retrying finishes an interrupted failure.
    pub async fn fail_run(&self, id: Uuid) -> Result<Run, OrchestratorError> {
        let _guard = self.locks.acquire(id).await;
        let mut run = self.require(id).await?;
        if run.status.is_terminal() {
            return Err(OrchestratorError::InvalidState {
                id,
                reason: format!("already {}", run.status),
            });
        }

        let cancelled = self.store.cancel_open_tasks(id).await?;
        run.status = RunStatus::Failed;
        run.blockers.clear();
        run.updated_at = (self.clock)();
        self.store.update_run(&run).await?;

        tracing::warn!(run_id = %id, cancelled_tasks = cancelled, "run failed");
        self.notifier.notify(&RunEvent::RunFailed {
            run_id: id,
            cancelled_tasks: cancelled,
        });
        Ok(run)
    }

    /// Override the phase pointer without running any gate. The escape
    /// hatch for entering phases with no forward transition and for
    /// manual recovery; done runs stay done.
    pub async fn force_phase(&self, id: Uuid, phase: Phase) -> Result<Run, OrchestratorError> {
        let _guard = self.locks.acquire(id).await;
        let mut run = self.require(id).await?;
        if run.status == RunStatus::Done {
            return Err(OrchestratorError::InvalidState {
                id,
                reason: "run is done".to_string(),
            });
        }

        let from = run.phase;
        run.phase = phase;
        run.updated_at = (self.clock)();
        self.store.update_run(&run).await?;

        tracing::info!(run_id = %id, from = %from, to = %phase, "phase forced");
        self.notifier.notify(&RunEvent::PhaseForced {
            run_id: id,
            from_phase: from,
            to_phase: phase,
        });
        Ok(run)
    }

    pub async fn delete_run(&self, id: Uuid) -> Result<(), OrchestratorError> {
        {
            let _guard = self.locks.acquire(id).await;
            if !self.store.delete_run(id).await? {
                return Err(OrchestratorError::RunNotFound { id });
            }
        }
        self.locks.forget(id).await;

        tracing::info!(run_id = %id, "run deleted");
        self.notifier.notify(&RunEvent::RunDeleted { run_id: id });
        Ok(())
    }

    async fn require(&self, id: Uuid) -> Result<Run, OrchestratorError> {
        self.store
            .get_run(id)
            .await?
            .ok_or(OrchestratorError::RunNotFound { id })
    }

    fn ensure_actionable(&self, run: &Run) -> Result<(), OrchestratorError> {
        if run.status == RunStatus::AwaitingHuman {
            return Err(OrchestratorError::InvalidState {
                id: run.id,
                reason: format!(
                    "status is awaiting_human with {} open blocker(s)",
                    run.blockers.len()
                ),
            });
        }
        if !run.status.is_actionable() {
            return Err(OrchestratorError::InvalidState {
                id: run.id,
                reason: format!("status is {}", run.status),
            });
        }
        Ok(())
    }

    async fn advance_auto(
        &self,
        mut run: Run,
        target: Phase,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        let from = run.phase;
        run.phase = target;
        run.status = RunStatus::Running;
        run.updated_at = (self.clock)();
        self.store.update_run(&run).await?;

        tracing::info!(run_id = %run.id, from = %from, to = %target, "run advanced");
        self.notifier.notify(&RunEvent::RunAdvanced {
            run_id: run.id,
            from_phase: from,
            to_phase: target,
            status: run.status,
        });
        Ok(outcome_of(run))
    }

    /// Run the phase agent, then hand its effects to the gated advance.
    /// A failing agent writes nothing: the run re-reads exactly as it was.
    async fn advance_agent(
        &self,
        run: Run,
        target: Phase,
        gate: TaskType,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        let ctx = AgentContext::new(
            run.id,
            run.phase,
            run.brief.clone(),
            self.clock,
            self.artifact_dir.clone(),
        );
        let input = AgentInput {
            objective: run.brief.goal.clone(),
        };

        let output = match self.agent.run(input, &ctx).await {
            Ok(output) => output,
            Err(source) => {
                tracing::warn!(
                    run_id = %run.id,
                    agent = self.agent.name(),
                    error = %source,
                    "agent failed; run left untouched"
                );
                return Err(OrchestratorError::Agent {
                    agent: self.agent.name().to_string(),
                    phase: run.phase,
                    source,
                });
            }
        };
        tracing::info!(
            run_id = %run.id,
            agent = self.agent.name(),
            summary = %output.summary,
            "agent finished"
        );

        let (artifacts, blockers) = ctx.into_effects();
        self.advance_gated(run, target, gate, artifacts, blockers)
            .await
    }

    async fn advance_gated(
        &self,
        mut run: Run,
        target: Phase,
        gate: TaskType,
        artifacts: Vec<ArtifactRef>,
        extra_blockers: Vec<BlockerRequest>,
    ) -> Result<AdvanceOutcome, OrchestratorError> {
        let now = (self.clock)();
        let mut tasks = vec![ManualTask::new(
            run.id,
            target,
            gate,
            gate_title(gate),
            gate_description(gate),
            now,
        )];
        for request in extra_blockers {
            tasks.push(ManualTask::new(
                run.id,
                target,
                request.blocker_type,
                request.title,
                request.description,
                now,
            ));
        }

        // Tasks land before the run flips. A crash in between leaves spare
        // open tasks on a still-actionable run, never an awaiting_human
        // run with nothing to resolve.
        for task in &tasks {
            self.store.add_manual_task(task).await?;
        }

        let from = run.phase;
        run.phase = target;
        run.status = RunStatus::AwaitingHuman;
        run.updated_at = now;
        self.store.update_run(&run).await?;

        for task in &tasks {
            self.notifier.notify(&RunEvent::TaskOpened { task: task.clone() });
        }
        tracing::info!(
            run_id = %run.id,
            from = %from,
            to = %target,
            gates = tasks.len(),
            "run advanced, awaiting human"
        );
        self.notifier.notify(&RunEvent::RunAdvanced {
            run_id: run.id,
            from_phase: from,
            to_phase: target,
            status: run.status,
        });

        let fresh = self.require(run.id).await?;
        Ok(AdvanceOutcome {
            run: fresh,
            created_artifacts: artifacts,
            created_tasks: tasks,
        })
    }

    async fn finish(&self, mut run: Run) -> Result<AdvanceOutcome, OrchestratorError> {
        run.status = RunStatus::Done;
        run.updated_at = (self.clock)();
        self.store.update_run(&run).await?;

        tracing::info!(run_id = %run.id, phase = %run.phase, "run completed");
        self.notifier
            .notify(&RunEvent::RunCompleted { run_id: run.id });
        Ok(outcome_of(run))
    }
}

fn outcome_of(run: Run) -> AdvanceOutcome {
    AdvanceOutcome {
        run,
        created_artifacts: Vec::new(),
        created_tasks: Vec::new(),
    }
}

fn gate_title(gate: TaskType) -> &'static str {
    match gate {
        TaskType::PortfolioApproval => "Approve the concept portfolio",
        TaskType::QaVerification => "Verify the build",
        TaskType::DeploymentUpload => "Upload the release",
    }
}

fn gate_description(gate: TaskType) -> &'static str {
    match gate {
        TaskType::PortfolioApproval => {
            "Review the generated concepts and pick the ones worth prioritizing."
        }
        TaskType::QaVerification => {
            "Install the candidate build and confirm it meets the release bar."
        }
        TaskType::DeploymentUpload => {
            "Upload the verified build to the distribution channel and confirm it is live."
        }
    }
}
