//! Reconciliation of the ledger against scheduler and remote-store signals.
//!
//! Per key, highest precedence first:
//! - an artifact present on the remote store makes the record `Completed`
//! - a building record takes its job's resolution; a claimed completion
//!   without a remote artifact is a failure
//! - terminal records whose artifact is absent are reported, never demoted
//!
//! Applying the same signals twice produces no further change.

use chrono::{DateTime, Utc};
use sifherd_core::{BuildKey, BuildStatus, JobOutcome};
use std::collections::HashMap;
use std::fmt;
use tracing::{info, warn};

use crate::error::Result;
use crate::ledger::Ledger;
use crate::remote::{Presence, RemoteIndex};
use crate::resolver::{JobResolver, Resolution, ResolutionSource};

pub const MISSING_ARTIFACT_ERROR: &str =
    "accounting/log reports completion but artifact missing remotely";
pub const SCHEDULER_FAILURE_ERROR: &str = "scheduler-reported failure";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    /// Artifact found on the remote store, whatever the ledger said.
    ArtifactPresent,
    /// Job finished and its artifact was confirmed.
    JobCompleted,
    /// Job claimed completion but no artifact was published.
    ArtifactMissing,
    JobFailed,
}

impl fmt::Display for TransitionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArtifactPresent => f.write_str("artifact present on remote store"),
            Self::JobCompleted => f.write_str("job completed"),
            Self::ArtifactMissing => f.write_str("job completed without artifact"),
            Self::JobFailed => f.write_str("job failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub key: BuildKey,
    pub job_id: String,
    pub from: BuildStatus,
    pub to: BuildStatus,
    pub cause: TransitionCause,
    pub error: Option<String>,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (job {}): {} -> {} ({})",
            self.key, self.job_id, self.from, self.to, self.cause
        )?;
        if let Some(error) = &self.error {
            write!(f, ": {}", error)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileWarning {
    /// Recorded as completed but the artifact is gone.
    CompletedButMissing { key: BuildKey },
    /// Recorded as failed and still no artifact.
    FailedNeedsRetry { key: BuildKey, error: Option<String> },
}

impl ReconcileWarning {
    pub fn key(&self) -> &BuildKey {
        match self {
            Self::CompletedButMissing { key } | Self::FailedNeedsRetry { key, .. } => key,
        }
    }
}

impl fmt::Display for ReconcileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CompletedButMissing { key } => {
                write!(f, "{}: completed but missing on remote store", key)
            }
            Self::FailedNeedsRetry { key, error } => match error {
                Some(error) => write!(f, "{}: failed, needs retry ({})", key, error),
                None => write!(f, "{}: failed, needs retry", key),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub transitions: Vec<Transition>,
    pub warnings: Vec<ReconcileWarning>,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        !self.transitions.is_empty()
    }
}

/// Apply one cycle's signals to the ledger.
///
/// `resolutions` holds the resolved outcome of building records; a building
/// record without a resolution is left alone.
pub fn apply(
    ledger: &mut Ledger,
    resolutions: &HashMap<BuildKey, Resolution>,
    remote: &RemoteIndex,
    now: DateTime<Utc>,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    let snapshot: Vec<_> = ledger
        .iter()
        .map(|(key, record)| (key.clone(), record.status(), record.job_id.clone()))
        .collect();

    for (key, status, job_id) in snapshot {
        let presence = remote.presence(&key);
        let resolution = resolutions.get(&key);

        if presence == Presence::Present {
            if status != BuildStatus::Completed && ledger.mark_completed(&key, now)? {
                let cause = match resolution.map(|r| r.outcome) {
                    Some(JobOutcome::Completed) if status == BuildStatus::Building => {
                        TransitionCause::JobCompleted
                    }
                    _ => TransitionCause::ArtifactPresent,
                };
                report.transitions.push(Transition {
                    key,
                    job_id,
                    from: status,
                    to: BuildStatus::Completed,
                    cause,
                    error: None,
                });
            }
            continue;
        }

        match status {
            BuildStatus::Building => {
                let Some(resolution) = resolution else {
                    continue;
                };
                match resolution.outcome {
                    JobOutcome::Completed if presence == Presence::Absent => {
                        if ledger.mark_failed_inconsistent(&key, MISSING_ARTIFACT_ERROR, now)? {
                            report.transitions.push(Transition {
                                key,
                                job_id,
                                from: status,
                                to: BuildStatus::Failed,
                                cause: TransitionCause::ArtifactMissing,
                                error: Some(MISSING_ARTIFACT_ERROR.to_string()),
                            });
                        }
                    }
                    JobOutcome::Failed => {
                        let error = failure_diagnostic(&resolution.source);
                        if ledger.mark_failed(&key, Some(error.clone()), now)? {
                            report.transitions.push(Transition {
                                key,
                                job_id,
                                from: status,
                                to: BuildStatus::Failed,
                                cause: TransitionCause::JobFailed,
                                error: Some(error),
                            });
                        }
                    }
                    // Completion with an unconfirmed artifact waits for a
                    // probe that can answer
                    JobOutcome::Completed | JobOutcome::Running | JobOutcome::Unknown => {}
                }
            }
            BuildStatus::Completed if presence == Presence::Absent => {
                report
                    .warnings
                    .push(ReconcileWarning::CompletedButMissing { key });
            }
            BuildStatus::Failed if presence == Presence::Absent => {
                let error = ledger
                    .get(&key)
                    .and_then(|record| record.error())
                    .map(str::to_string);
                report
                    .warnings
                    .push(ReconcileWarning::FailedNeedsRetry { key, error });
            }
            BuildStatus::Completed | BuildStatus::Failed => {}
        }
    }

    for transition in &report.transitions {
        info!("{}", transition);
    }
    for warning in &report.warnings {
        warn!("{}", warning);
    }

    Ok(report)
}

fn failure_diagnostic(source: &ResolutionSource) -> String {
    match source {
        ResolutionSource::Accounting(state) => {
            format!("{} ({})", SCHEDULER_FAILURE_ERROR, state)
        }
        ResolutionSource::LogMarker(marker) => {
            format!("{} (log: {})", SCHEDULER_FAILURE_ERROR, marker)
        }
        _ => SCHEDULER_FAILURE_ERROR.to_string(),
    }
}

/// Resolves building jobs and reconciles the ledger against the remote index.
pub struct ReconciliationEngine {
    resolver: JobResolver,
    max_parallel: usize,
}

impl ReconciliationEngine {
    pub fn new(resolver: JobResolver, max_parallel: usize) -> Self {
        Self {
            resolver,
            max_parallel,
        }
    }

    pub async fn reconcile(
        &self,
        ledger: &mut Ledger,
        remote: &RemoteIndex,
    ) -> Result<ReconcileReport> {
        let resolutions = self
            .resolver
            .resolve_all(ledger.building_jobs(), self.max_parallel)
            .await;
        apply(ledger, &resolutions, remote, Utc::now())
    }
}
