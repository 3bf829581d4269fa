use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ClusterError, Result};

/// Captured result of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }
}

/// Runs external programs with a bounded wall-clock budget per call.
///
/// The child is killed when the budget runs out, so a hung `ssh` or `squeue`
/// never outlives the call that spawned it.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
    current_dir: Option<PathBuf>,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            current_dir: None,
        }
    }

    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a program and return its output whatever the exit status.
    pub async fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        debug!("Running {} {:?}", program, args);

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| ClusterError::Timeout {
                command: describe(program, args),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ClusterError::CommandNotFound(program.to_string())
                } else {
                    ClusterError::Io(e)
                }
            })?;

        Ok(CommandOutput {
            status_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run a program and fail unless it exits successfully.
    pub async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = self.output(program, args).await?;

        if !output.success() {
            return Err(ClusterError::CommandFailed(format!(
                "{} failed: {}",
                describe(program, args),
                output.stderr.trim()
            )));
        }

        Ok(output.stdout)
    }
}

fn describe(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}
