use sifherd_core::BuildKey;
use std::fmt;

use crate::planner::{HeldBuild, PlannedBuild};
use crate::reconcile::{ReconcileWarning, Transition};
use crate::submission::{SubmissionFailure, Submitted};

/// What one orchestration cycle observed and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub dry_run: bool,
    pub entities: usize,
    pub newly_completed: Vec<Transition>,
    pub newly_failed: Vec<Transition>,
    /// `(key, job_id)` of jobs still running after reconciliation.
    pub still_building: Vec<(BuildKey, String)>,
    pub warnings: Vec<ReconcileWarning>,
    pub planned: Vec<PlannedBuild>,
    pub submitted: Vec<Submitted>,
    pub submission_failures: Vec<SubmissionFailure>,
    pub held: Vec<HeldBuild>,
}

impl CycleSummary {
    pub fn has_failures(&self) -> bool {
        !self.newly_failed.is_empty() || !self.submission_failures.is_empty()
    }

    pub fn is_quiet(&self) -> bool {
        self.newly_completed.is_empty()
            && self.newly_failed.is_empty()
            && self.still_building.is_empty()
            && self.warnings.is_empty()
            && self.planned.is_empty()
            && self.held.is_empty()
    }
}

impl fmt::Display for CycleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Cycle summary{} ({} entities)",
            if self.dry_run { " [dry run]" } else { "" },
            self.entities
        )?;

        if self.is_quiet() {
            return writeln!(f, "  ● All artifacts present, nothing to do");
        }

        if !self.newly_completed.is_empty() {
            writeln!(f, "  Newly completed ({}):", self.newly_completed.len())?;
            for t in &self.newly_completed {
                writeln!(f, "    ✓ {} (job {}, {})", t.key, t.job_id, t.cause)?;
            }
        }

        if !self.newly_failed.is_empty() {
            writeln!(f, "  Newly failed ({}):", self.newly_failed.len())?;
            for t in &self.newly_failed {
                writeln!(
                    f,
                    "    ✗ {} (job {}): {}",
                    t.key,
                    t.job_id,
                    t.error.as_deref().unwrap_or("no diagnostic")
                )?;
            }
        }

        if !self.still_building.is_empty() {
            writeln!(f, "  Still building ({}):", self.still_building.len())?;
            for (key, job_id) in &self.still_building {
                writeln!(f, "    ◐ {} (job {})", key, job_id)?;
            }
        }

        if !self.warnings.is_empty() {
            writeln!(f, "  Warnings ({}):", self.warnings.len())?;
            for warning in &self.warnings {
                writeln!(f, "    ⚠ {}", warning)?;
            }
        }

        if !self.held.is_empty() {
            writeln!(f, "  Held ({}), clear to retry:", self.held.len())?;
            for held in &self.held {
                writeln!(
                    f,
                    "    ⏸ {} ({} completions without artifact)",
                    held.key, held.inconsistent_completions
                )?;
            }
        }

        if self.dry_run {
            if !self.planned.is_empty() {
                writeln!(f, "  Would submit ({}):", self.planned.len())?;
                for planned in &self.planned {
                    writeln!(f, "    → {} ({})", planned.key, planned.reason)?;
                }
            }
            return Ok(());
        }

        if !self.submitted.is_empty() {
            writeln!(f, "  Submitted ({}):", self.submitted.len())?;
            for submitted in &self.submitted {
                writeln!(f, "    → {} as job {}", submitted.key, submitted.job_id)?;
            }
        }

        if !self.submission_failures.is_empty() {
            writeln!(
                f,
                "  Submission failures ({}):",
                self.submission_failures.len()
            )?;
            for failure in &self.submission_failures {
                writeln!(f, "    ✗ {}", failure)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::PlanReason;
    use crate::reconcile::{TransitionCause, SCHEDULER_FAILURE_ERROR};
    use sifherd_core::BuildStatus;

    fn key() -> BuildKey {
        BuildKey::new("algoX", "1.0").unwrap()
    }

    #[test]
    fn test_quiet_summary() {
        let summary = CycleSummary {
            entities: 3,
            ..Default::default()
        };
        let text = summary.to_string();
        assert!(text.contains("3 entities"));
        assert!(text.contains("nothing to do"));
        assert!(!summary.has_failures());
    }

    #[test]
    fn test_failure_lines_include_diagnostic() {
        let summary = CycleSummary {
            entities: 1,
            newly_failed: vec![Transition {
                key: key(),
                job_id: "42".to_string(),
                from: BuildStatus::Building,
                to: BuildStatus::Failed,
                cause: TransitionCause::JobFailed,
                error: Some(SCHEDULER_FAILURE_ERROR.to_string()),
            }],
            ..Default::default()
        };
        let text = summary.to_string();
        assert!(text.contains("✗ algoX@1.0 (job 42): scheduler-reported failure"));
        assert!(summary.has_failures());
    }

    #[test]
    fn test_dry_run_lists_plan() {
        let summary = CycleSummary {
            dry_run: true,
            entities: 1,
            planned: vec![PlannedBuild {
                key: key(),
                reason: PlanReason::FirstAttempt,
            }],
            ..Default::default()
        };
        let text = summary.to_string();
        assert!(text.contains("[dry run]"));
        assert!(text.contains("→ algoX@1.0 (first attempt)"));
    }
}
