use async_trait::async_trait;
use regex::Regex;
use sifherd_core::{AccountingState, QueueState};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::command::CommandRunner;
use crate::error::{ClusterError, Result};
use crate::traits::SchedulerClient;

static SUBMITTED_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Slurm backend driven through `sbatch`, `squeue` and `sacct`.
pub struct SlurmScheduler {
    runner: CommandRunner,
}

impl SlurmScheduler {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

/// Extract the job id from `sbatch` output (`Submitted batch job 12345`).
pub fn parse_submission(stdout: &str) -> Result<String> {
    let pattern = SUBMITTED_PATTERN.get_or_init(|| {
        Regex::new(r"Submitted batch job (\d+)").expect("Invalid submission regex pattern")
    });

    pattern
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            ClusterError::Parse(format!(
                "no job id in sbatch output: {}",
                stdout.trim()
            ))
        })
}

fn first_line(stdout: &str) -> Option<&str> {
    stdout.lines().map(str::trim).find(|line| !line.is_empty())
}

#[async_trait]
impl SchedulerClient for SlurmScheduler {
    fn name(&self) -> &'static str {
        "slurm"
    }

    async fn submit(&self, script: &Path) -> Result<String> {
        let script_arg = script
            .to_str()
            .ok_or_else(|| ClusterError::Parse(format!("non-UTF-8 path: {}", script.display())))?;

        let output = self.runner.output("sbatch", &[script_arg]).await?;
        if !output.success() {
            return Err(ClusterError::SubmissionRejected(output.stderr.trim().to_string()));
        }

        let job_id = parse_submission(&output.stdout)?;
        info!("Submitted {} as job {}", script.display(), job_id);
        Ok(job_id)
    }

    async fn queue_state(&self, job_id: &str) -> Result<Option<QueueState>> {
        let output = self
            .runner
            .output("squeue", &["-j", job_id, "-h", "-o", "%T"])
            .await?;

        if !output.success() {
            // squeue rejects ids that have already been purged from the queue
            if output.stderr.contains("Invalid job id") {
                return Ok(None);
            }
            return Err(ClusterError::CommandFailed(format!(
                "squeue -j {} failed: {}",
                job_id,
                output.stderr.trim()
            )));
        }

        Ok(first_line(&output.stdout).map(QueueState::parse))
    }

    async fn accounting_state(&self, job_id: &str) -> Result<Option<AccountingState>> {
        let output = self
            .runner
            .output("sacct", &["-j", job_id, "-X", "-n", "-o", "State", "--parsable2"])
            .await?;

        if !output.success() {
            debug!(
                job_id,
                stderr = %output.stderr.trim(),
                "Accounting unavailable"
            );
            return Ok(None);
        }

        Ok(first_line(&output.stdout).map(AccountingState::parse))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submission() {
        let id = parse_submission("Submitted batch job 123456\n").unwrap();
        assert_eq!(id, "123456");
    }

    #[test]
    fn test_parse_submission_without_id() {
        let result = parse_submission("sbatch: error: Batch job submission failed");
        assert!(matches!(result, Err(ClusterError::Parse(_))));
    }

    #[test]
    fn test_first_line_skips_blank() {
        assert_eq!(first_line("\n  \nCOMPLETED\nCOMPLETED\n"), Some("COMPLETED"));
        assert_eq!(first_line("\n\n"), None);
    }
}
