//! The agent seam: phase work the orchestrator delegates to a pluggable
//! collaborator. Agents are pure functions of their input plus an
//! [`AgentContext`]; everything they may touch is injected through it.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::model::{ArtifactRef, Brief, Phase, TaskType};

pub mod theme;

pub use theme::ThemeSynthesisAgent;

pub type ClockFn = fn() -> DateTime<Utc>;

/// The typed request an agent receives for one invocation.
#[derive(Debug, Clone)]
pub struct AgentInput {
    pub objective: String,
}

/// The typed result an agent returns. `artifact` points at output the
/// agent saved through its context; the run record never stores it.
#[derive(Debug, Clone)]
pub struct AgentOutput {
    pub summary: String,
    pub artifact: ArtifactRef,
}

/// Payload for [`AgentContext::save_artifact`].
#[derive(Debug, Clone)]
pub struct ArtifactSpec {
    pub kind: String,
    pub extension: String,
    pub data: Vec<u8>,
    pub meta: Option<serde_json::Value>,
}

/// A manual checkpoint an agent asks the orchestrator to raise once the
/// invocation returns successfully.
#[derive(Debug, Clone)]
pub struct BlockerRequest {
    pub title: String,
    pub description: String,
    pub blocker_type: TaskType,
}

/// Abstraction over agent work for testability.
/// Real implementation: `ThemeSynthesisAgent`. Test doubles live in the
/// orchestrator tests.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, input: AgentInput, ctx: &AgentContext) -> Result<AgentOutput>;
}

#[derive(Default)]
struct ContextState {
    saved: Vec<ArtifactRef>,
    blockers: Vec<BlockerRequest>,
}

/// One invocation's view of the world: identity of the run being worked,
/// the brief, a clock, and the two side-effecting callbacks the contract
/// allows (artifact save, blocker emit). Side effects are buffered here;
/// the orchestrator collects them after the agent returns.
pub struct AgentContext {
    pub run_id: Uuid,
    pub phase: Phase,
    pub brief: Brief,
    clock: ClockFn,
    artifact_root: PathBuf,
    state: Mutex<ContextState>,
}

impl AgentContext {
    pub fn new(
        run_id: Uuid,
        phase: Phase,
        brief: Brief,
        clock: ClockFn,
        artifact_root: PathBuf,
    ) -> Self {
        Self {
            run_id,
            phase,
            brief,
            clock,
            artifact_root,
            state: Mutex::new(ContextState::default()),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Write artifact bytes under the run's directory, hash them, and
    /// record the reference. Files are named `<kind>-<seq>.<extension>`
    /// with a per-context sequence so repeated saves never collide.
    pub fn save_artifact(&self, spec: ArtifactSpec) -> Result<ArtifactRef> {
        let dir = self.artifact_root.join(self.run_id.to_string());
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create artifact directory {}", dir.display()))?;

        let mut state = self.lock_state();
        let seq = state.saved.len() + 1;
        let file_name = format!("{}-{:03}.{}", spec.kind, seq, spec.extension);
        let path = dir.join(&file_name);
        std::fs::write(&path, &spec.data)
            .with_context(|| format!("Failed to write artifact {}", path.display()))?;

        if let Some(meta) = &spec.meta {
            let meta_path = dir.join(format!("{}.meta.json", file_name));
            let bytes = serde_json::to_vec_pretty(meta).context("Failed to encode artifact meta")?;
            std::fs::write(&meta_path, bytes)
                .with_context(|| format!("Failed to write artifact meta {}", meta_path.display()))?;
        }

        let sha256 = format!("{:x}", Sha256::digest(&spec.data));
        let artifact = ArtifactRef {
            path: path.to_string_lossy().to_string(),
            sha256: Some(sha256),
        };
        state.saved.push(artifact.clone());
        Ok(artifact)
    }

    /// Buffer a blocker request for the orchestrator to turn into a
    /// manual task after the invocation succeeds.
    pub fn emit_blocker(&self, request: BlockerRequest) {
        self.lock_state().blockers.push(request);
    }

    /// Consume the context, yielding everything the agent produced.
    pub fn into_effects(self) -> (Vec<ArtifactRef>, Vec<BlockerRequest>) {
        let state = self
            .state
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (state.saved, state.blockers)
    }

    // A poisoned buffer only ever loses in-flight records from a panicked
    // agent thread; run state lives in the store, not here.
    fn lock_state(&self) -> std::sync::MutexGuard<'_, ContextState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BriefConstraints;
    use tempfile::tempdir;

    fn sample_brief() -> Brief {
        Brief {
            industry: "hypercasual".to_string(),
            theme: "neon skyline".to_string(),
            audience: Some("commuters".to_string()),
            goal: "Generate runner concepts".to_string(),
            constraints: BriefConstraints::default(),
        }
    }

    fn test_context(root: PathBuf) -> AgentContext {
        AgentContext::new(Uuid::new_v4(), Phase::Market, sample_brief(), Utc::now, root)
    }

    #[test]
    fn test_save_artifact_writes_file_and_hashes() {
        let dir = tempdir().unwrap();
        let ctx = test_context(dir.path().to_path_buf());
        let artifact = ctx
            .save_artifact(ArtifactSpec {
                kind: "theme-concepts".to_string(),
                extension: "md".to_string(),
                data: b"# Concepts".to_vec(),
                meta: None,
            })
            .unwrap();

        assert!(artifact.path.ends_with("theme-concepts-001.md"));
        let on_disk = std::fs::read(&artifact.path).unwrap();
        assert_eq!(on_disk, b"# Concepts");
        let sha = artifact.sha256.unwrap();
        assert_eq!(sha.len(), 64);
        assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_save_artifact_sequence_increments() {
        let dir = tempdir().unwrap();
        let ctx = test_context(dir.path().to_path_buf());
        let spec = |kind: &str| ArtifactSpec {
            kind: kind.to_string(),
            extension: "txt".to_string(),
            data: b"x".to_vec(),
            meta: None,
        };
        let first = ctx.save_artifact(spec("notes")).unwrap();
        let second = ctx.save_artifact(spec("notes")).unwrap();
        assert!(first.path.ends_with("notes-001.txt"));
        assert!(second.path.ends_with("notes-002.txt"));
    }

    #[test]
    fn test_save_artifact_writes_meta_sidecar() {
        let dir = tempdir().unwrap();
        let ctx = test_context(dir.path().to_path_buf());
        let artifact = ctx
            .save_artifact(ArtifactSpec {
                kind: "report".to_string(),
                extension: "md".to_string(),
                data: b"body".to_vec(),
                meta: Some(serde_json::json!({"source": "unit-test"})),
            })
            .unwrap();
        let meta_path = format!("{}.meta.json", artifact.path);
        let raw = std::fs::read_to_string(meta_path).unwrap();
        assert!(raw.contains("unit-test"));
    }

    #[test]
    fn test_into_effects_returns_buffered_side_effects() {
        let dir = tempdir().unwrap();
        let ctx = test_context(dir.path().to_path_buf());
        ctx.save_artifact(ArtifactSpec {
            kind: "a".to_string(),
            extension: "txt".to_string(),
            data: b"1".to_vec(),
            meta: None,
        })
        .unwrap();
        ctx.emit_blocker(BlockerRequest {
            title: "Check the palette".to_string(),
            description: "Colors look off".to_string(),
            blocker_type: TaskType::PortfolioApproval,
        });

        let (artifacts, blockers) = ctx.into_effects();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(blockers.len(), 1);
        assert_eq!(blockers[0].title, "Check the palette");
    }

    #[test]
    fn test_context_clock_is_injected() {
        fn fixed() -> DateTime<Utc> {
            DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc)
        }
        let dir = tempdir().unwrap();
        let ctx = AgentContext::new(
            Uuid::new_v4(),
            Phase::Market,
            sample_brief(),
            fixed,
            dir.path().to_path_buf(),
        );
        assert_eq!(ctx.now(), fixed());
    }
}
