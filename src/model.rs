use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline stages in fixed order. A run traverses the sequence
/// monotonically forward; the orchestrator never moves a run backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Intake,
    Market,
    Synthesis,
    Deconstruct,
    Prioritize,
    Build,
    Qa,
    Deploy,
    Measure,
    Decision,
}

impl Phase {
    pub const ALL: [Phase; 10] = [
        Phase::Intake,
        Phase::Market,
        Phase::Synthesis,
        Phase::Deconstruct,
        Phase::Prioritize,
        Phase::Build,
        Phase::Qa,
        Phase::Deploy,
        Phase::Measure,
        Phase::Decision,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Market => "market",
            Self::Synthesis => "synthesis",
            Self::Deconstruct => "deconstruct",
            Self::Prioritize => "prioritize",
            Self::Build => "build",
            Self::Qa => "qa",
            Self::Deploy => "deploy",
            Self::Measure => "measure",
            Self::Decision => "decision",
        }
    }

    /// Position in the pipeline sequence, 0 through 9.
    pub fn index(&self) -> usize {
        match self {
            Self::Intake => 0,
            Self::Market => 1,
            Self::Synthesis => 2,
            Self::Deconstruct => 3,
            Self::Prioritize => 4,
            Self::Build => 5,
            Self::Qa => 6,
            Self::Deploy => 7,
            Self::Measure => 8,
            Self::Decision => 9,
        }
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "intake" => Ok(Self::Intake),
            "market" => Ok(Self::Market),
            "synthesis" => Ok(Self::Synthesis),
            "deconstruct" => Ok(Self::Deconstruct),
            "prioritize" => Ok(Self::Prioritize),
            "build" => Ok(Self::Build),
            "qa" => Ok(Self::Qa),
            "deploy" => Ok(Self::Deploy),
            "measure" => Ok(Self::Measure),
            "decision" => Ok(Self::Decision),
            _ => Err(format!("Invalid phase: {}", s)),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    AwaitingHuman,
    Paused,
    Failed,
    Done,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::AwaitingHuman => "awaiting_human",
            Self::Paused => "paused",
            Self::Failed => "failed",
            Self::Done => "done",
        }
    }

    /// Whether `advance` may act on a run in this status.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "awaiting_human" => Ok(Self::AwaitingHuman),
            "paused" => Ok(Self::Paused),
            "failed" => Ok(Self::Failed),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    PortfolioApproval,
    QaVerification,
    DeploymentUpload,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PortfolioApproval => "portfolio_approval",
            Self::QaVerification => "qa_verification",
            Self::DeploymentUpload => "deployment_upload",
        }
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "portfolio_approval" => Ok(Self::PortfolioApproval),
            "qa_verification" => Ok(Self::QaVerification),
            "deployment_upload" => Ok(Self::DeploymentUpload),
            _ => Err(format!("Invalid task type: {}", s)),
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Open,
    Completed,
    Cancelled,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid task state: {}", s)),
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional numeric limits a brief may carry. All are bounds the pipeline
/// phases consult; none are enforced by the orchestrator itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BriefConstraints {
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default)]
    pub timebox_hours: Option<u32>,
}

/// The immutable intake describing what a run should produce.
/// Validated once at creation and never mutated afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brief {
    pub industry: String,
    pub theme: String,
    #[serde(default)]
    pub audience: Option<String>,
    pub goal: String,
    #[serde(default)]
    pub constraints: BriefConstraints,
}

impl Brief {
    /// Checks required fields and constraint ranges, collecting every
    /// problem into one message so the caller can fix them all at once.
    pub fn validate(&self) -> Result<(), String> {
        let mut problems = Vec::new();
        if self.industry.trim().is_empty() {
            problems.push("industry is required");
        }
        if self.theme.trim().is_empty() {
            problems.push("theme is required");
        }
        if self.goal.trim().is_empty() {
            problems.push("goal is required");
        }
        if let Some(budget) = self.constraints.budget {
            if budget < 0.0 || !budget.is_finite() {
                problems.push("budget must be a non-negative number");
            }
        }
        if self.constraints.max_tokens == Some(0) {
            problems.push("max_tokens must be greater than zero");
        }
        if self.constraints.timebox_hours == Some(0) {
            problems.push("timebox_hours must be greater than zero");
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}

/// A human checkpoint gating a run's progress. Owned by exactly one run;
/// only tasks in the `open` state count as blockers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualTask {
    pub id: Uuid,
    pub run_id: Uuid,
    pub phase: Phase,
    pub task_type: TaskType,
    pub title: String,
    pub description: String,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assignee: Option<String>,
}

impl ManualTask {
    pub fn new(
        run_id: Uuid,
        phase: Phase,
        task_type: TaskType,
        title: impl Into<String>,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            phase,
            task_type,
            title: title.into(),
            description: description.into(),
            state: TaskState::Open,
            created_at: now,
            due_at: None,
            completed_at: None,
            assignee: None,
        }
    }
}

/// One end-to-end pipeline instance for one brief.
///
/// `blockers` is a derived view of the run's open tasks, populated by the
/// store on read. It is never written as-is; stores persist tasks in their
/// own table/collection and recompute the view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub status: RunStatus,
    pub phase: Phase,
    pub brief: Brief,
    #[serde(default)]
    pub blockers: Vec<ManualTask>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// A freshly created run: intake is satisfied by the act of submission,
    /// so new runs start queued at the market phase.
    pub fn new(brief: Brief, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: RunStatus::Queued,
            phase: Phase::Market,
            brief,
            blockers: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Pointer to an artifact produced by agent work. The core records where
/// output landed for audit purposes; it never owns the bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

/// What one `advance` call did: the fresh run state plus everything the
/// call produced. Artifact and task lists are empty unless a gate fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvanceOutcome {
    pub run: Run,
    pub created_artifacts: Vec<ArtifactRef>,
    pub created_tasks: Vec<ManualTask>,
}
