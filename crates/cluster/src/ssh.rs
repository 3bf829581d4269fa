use async_trait::async_trait;
use tracing::debug;

use crate::command::{CommandOutput, CommandRunner};
use crate::error::{ClusterError, Result};
use crate::traits::RemoteStore;

/// ssh reserves this exit status for its own connection errors.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Remote artifact store reached over `ssh`.
pub struct SshRemoteStore {
    host: String,
    runner: CommandRunner,
}

impl SshRemoteStore {
    pub fn new(host: impl Into<String>, runner: CommandRunner) -> Self {
        Self {
            host: host.into(),
            runner,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    async fn run_remote(&self, script: &str) -> Result<CommandOutput> {
        debug!(host = %self.host, script, "Running remote command");

        let output = self
            .runner
            .output("ssh", &["-o", "BatchMode=yes", &self.host, script])
            .await?;

        if output.status_code == Some(SSH_CONNECTION_FAILURE) {
            return Err(ClusterError::Unreachable(format!(
                "{}: {}",
                self.host,
                output.stderr.trim()
            )));
        }
        if !output.success() {
            return Err(ClusterError::CommandFailed(format!(
                "ssh {} '{}' failed: {}",
                self.host,
                script,
                output.stderr.trim()
            )));
        }

        Ok(output)
    }

    async fn probe(&self, test_flag: &str, path: &str) -> Result<bool> {
        let script = format!(
            "test {} {} && echo exists || echo missing",
            test_flag,
            shell_quote(path)
        );
        let output = self.run_remote(&script).await?;
        parse_probe(&output.stdout)
    }
}

fn parse_probe(stdout: &str) -> Result<bool> {
    match stdout.trim() {
        "exists" => Ok(true),
        "missing" => Ok(false),
        other => Err(ClusterError::Parse(format!(
            "unexpected probe output: {}",
            other
        ))),
    }
}

/// Quote a value for a POSIX shell unless it is made only of safe characters.
pub fn shell_quote(value: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "/._+-=:@%,".contains(c);
    if !value.is_empty() && value.chars().all(safe) {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

#[async_trait]
impl RemoteStore for SshRemoteStore {
    fn name(&self) -> &'static str {
        "ssh"
    }

    async fn directory_exists(&self, path: &str) -> Result<bool> {
        self.probe("-d", path).await
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        self.probe("-f", path).await
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        self.run_remote(&format!("mkdir -p {}", shell_quote(path)))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_shell_quote_plain() {
        assert_eq!(
            shell_quote("/data/containers/algo/1.0/container.sif"),
            "/data/containers/algo/1.0/container.sif"
        );
    }

    #[test]
    fn test_shell_quote_special() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("$(reboot)"), "'$(reboot)'");
    }

    #[test]
    fn test_parse_probe() {
        assert!(parse_probe("exists\n").unwrap());
        assert!(!parse_probe("missing").unwrap());
        assert!(parse_probe("Welcome to the cluster").is_err());
    }

    #[test]
    fn test_host() {
        let store = SshRemoteStore::new("alexandria", CommandRunner::new(Duration::from_secs(1)));
        assert_eq!(store.host(), "alexandria");
        assert_eq!(store.name(), "ssh");
    }
}
