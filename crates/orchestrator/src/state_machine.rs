use sifherd_core::{BuildKey, BuildStatus};

use crate::error::{OrchestratorError, Result};

/// Forward-only status transitions within one build episode.
///
/// Re-entering `Building` is not a transition: it starts a new episode and
/// goes through `Ledger::mark_building`.
pub struct BuildStateMachine;

impl BuildStateMachine {
    pub fn validate_transition(key: &BuildKey, from: &BuildStatus, to: &BuildStatus) -> Result<()> {
        let allowed = Self::allowed_transitions(from);

        if allowed.contains(to) {
            Ok(())
        } else {
            Err(OrchestratorError::invalid_transition(key, from, to))
        }
    }

    fn allowed_transitions(from: &BuildStatus) -> Vec<BuildStatus> {
        match from {
            BuildStatus::Building => vec![BuildStatus::Completed, BuildStatus::Failed],
            // An artifact can still show up after the job was declared failed
            BuildStatus::Failed => vec![BuildStatus::Completed],
            BuildStatus::Completed => vec![],
        }
    }

    pub fn can_transition(from: &BuildStatus, to: &BuildStatus) -> bool {
        Self::allowed_transitions(from).contains(to)
    }
}
