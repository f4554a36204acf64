use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::model::{ManualTask, Phase, Run, RunStatus};

/// Buffered events per subscriber before the channel starts lagging.
const EVENT_BUFFER: usize = 256;

// ── Run lifecycle events ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RunEvent {
    RunCreated {
        run: Run,
    },
    RunAdvanced {
        run_id: Uuid,
        from_phase: Phase,
        to_phase: Phase,
        status: RunStatus,
    },
    TaskOpened {
        task: ManualTask,
    },
    TaskResolved {
        run_id: Uuid,
        task_id: Uuid,
        resumed: bool,
    },
    RunCompleted {
        run_id: Uuid,
    },
    RunPaused {
        run_id: Uuid,
    },
    RunResumed {
        run_id: Uuid,
    },
    RunFailed {
        run_id: Uuid,
        cancelled_tasks: u64,
    },
    PhaseForced {
        run_id: Uuid,
        from_phase: Phase,
        to_phase: Phase,
    },
    RunDeleted {
        run_id: Uuid,
    },
}

// ── Notifier ─────────────────────────────────────────────────────────

/// In-process pub/sub for run lifecycle events. Constructed once at
/// startup and handed to the orchestrator and the WebSocket mount; there
/// is no ambient global instance.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<String>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Serialize and publish an event to all subscribers.
    /// Returns silently when nobody is listening.
    pub fn notify(&self, event: &RunEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                let _ = self.tx.send(json); // Ignore error if no receivers
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize run event");
            }
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
