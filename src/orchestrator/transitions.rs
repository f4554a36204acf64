use crate::model::{Phase, TaskType};

/// What leaving a phase requires and where it lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Agent work produces artifacts, then a gate task blocks the target
    /// phase until a human signs off.
    AgentGated { target: Phase, gate: TaskType },
    /// No work and no gate; the run moves on immediately.
    Auto { target: Phase },
    /// No agent work, but a gate task still blocks the target phase.
    HumanGated { target: Phase, gate: TaskType },
    /// The run is finished once this phase's exit is requested.
    Terminal,
}

/// The forward path through the pipeline. Phases without an entry have no
/// automatic exit and are only reachable by forcing the phase directly.
static TRANSITIONS: &[(Phase, TransitionKind)] = &[
    (
        Phase::Market,
        TransitionKind::AgentGated {
            target: Phase::Prioritize,
            gate: TaskType::PortfolioApproval,
        },
    ),
    (
        Phase::Prioritize,
        TransitionKind::Auto {
            target: Phase::Build,
        },
    ),
    (
        Phase::Build,
        TransitionKind::HumanGated {
            target: Phase::Qa,
            gate: TaskType::QaVerification,
        },
    ),
    (
        Phase::Qa,
        TransitionKind::HumanGated {
            target: Phase::Deploy,
            gate: TaskType::DeploymentUpload,
        },
    ),
    (
        Phase::Deploy,
        TransitionKind::Auto {
            target: Phase::Measure,
        },
    ),
    (
        Phase::Measure,
        TransitionKind::Auto {
            target: Phase::Decision,
        },
    ),
    (Phase::Decision, TransitionKind::Terminal),
];

/// Look up the exit rule for `phase`, if it has one.
pub fn transition_for(phase: Phase) -> Option<TransitionKind> {
    TRANSITIONS
        .iter()
        .find(|(from, _)| *from == phase)
        .map(|(_, kind)| *kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_target_moves_strictly_forward() {
        for (from, kind) in TRANSITIONS {
            let target = match kind {
                TransitionKind::AgentGated { target, .. } => Some(*target),
                TransitionKind::Auto { target } => Some(*target),
                TransitionKind::HumanGated { target, .. } => Some(*target),
                TransitionKind::Terminal => None,
            };
            if let Some(target) = target {
                assert!(
                    target.index() > from.index(),
                    "{from} must not move backward to {target}"
                );
            }
        }
    }

    #[test]
    fn test_phases_without_exits_have_no_entry() {
        assert_eq!(transition_for(Phase::Intake), None);
        assert_eq!(transition_for(Phase::Synthesis), None);
        assert_eq!(transition_for(Phase::Deconstruct), None);
    }

    #[test]
    fn test_market_exit_is_agent_gated_approval() {
        assert_eq!(
            transition_for(Phase::Market),
            Some(TransitionKind::AgentGated {
                target: Phase::Prioritize,
                gate: TaskType::PortfolioApproval,
            })
        );
    }

    #[test]
    fn test_decision_is_terminal() {
        assert_eq!(transition_for(Phase::Decision), Some(TransitionKind::Terminal));
    }

    #[test]
    fn test_chain_from_market_reaches_decision() {
        let mut phase = Phase::Market;
        let mut hops = 0;
        while let Some(kind) = transition_for(phase) {
            match kind {
                TransitionKind::AgentGated { target, .. }
                | TransitionKind::Auto { target }
                | TransitionKind::HumanGated { target, .. } => phase = target,
                TransitionKind::Terminal => break,
            }
            hops += 1;
            assert!(hops <= Phase::ALL.len(), "transition table loops");
        }
        assert_eq!(phase, Phase::Decision);
    }
}
