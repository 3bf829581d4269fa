use sifherd_core::{BuildKey, BuildStatus};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

use crate::ledger::Ledger;
use crate::remote::{Presence, RemoteIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanReason {
    FirstAttempt,
    RetryAfterFailure,
    /// Recorded as completed but the artifact is missing.
    ArtifactMissing,
}

impl fmt::Display for PlanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstAttempt => f.write_str("first attempt"),
            Self::RetryAfterFailure => f.write_str("retry after failure"),
            Self::ArtifactMissing => f.write_str("artifact missing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBuild {
    pub key: BuildKey,
    pub reason: PlanReason,
}

/// A key the planner would resubmit but holds back after repeated
/// completions that never published an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldBuild {
    pub key: BuildKey,
    pub inconsistent_completions: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionPlan {
    pub builds: Vec<PlannedBuild>,
    pub held: Vec<HeldBuild>,
}

impl SubmissionPlan {
    pub fn keys(&self) -> Vec<BuildKey> {
        self.builds.iter().map(|b| b.key.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }
}

/// Decides which keys to submit next.
///
/// A pure function of its inputs: the same entities, remote index and ledger
/// always produce the same plan, in entity input order.
#[derive(Debug, Clone, Default)]
pub struct SubmissionPlanner {
    max_inconsistent_completions: Option<u32>,
}

impl SubmissionPlanner {
    pub fn new(max_inconsistent_completions: Option<u32>) -> Self {
        Self {
            max_inconsistent_completions,
        }
    }

    pub fn plan(
        &self,
        entities: &[BuildKey],
        remote: &RemoteIndex,
        ledger: &Ledger,
    ) -> SubmissionPlan {
        let mut plan = SubmissionPlan::default();
        let mut seen = HashSet::new();

        for key in entities {
            if !seen.insert(key) {
                continue;
            }

            match remote.presence(key) {
                Presence::Present => continue,
                Presence::Unknown => {
                    debug!(key = %key, "Skipping key with unknown artifact presence");
                    continue;
                }
                Presence::Absent => {}
            }

            let record = match ledger.get(key) {
                None => {
                    plan.builds.push(PlannedBuild {
                        key: key.clone(),
                        reason: PlanReason::FirstAttempt,
                    });
                    continue;
                }
                Some(record) => record,
            };

            let reason = match record.status() {
                BuildStatus::Building => continue,
                BuildStatus::Failed => PlanReason::RetryAfterFailure,
                BuildStatus::Completed => PlanReason::ArtifactMissing,
            };

            if let Some(limit) = self.max_inconsistent_completions {
                if record.inconsistent_completions >= limit {
                    plan.held.push(HeldBuild {
                        key: key.clone(),
                        inconsistent_completions: record.inconsistent_completions,
                    });
                    continue;
                }
            }

            plan.builds.push(PlannedBuild {
                key: key.clone(),
                reason,
            });
        }

        plan
    }
}
