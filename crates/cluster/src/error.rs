use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Command timed out after {secs}s: {command}")]
    Timeout { command: String, secs: u64 },

    #[error("Remote host unreachable: {0}")]
    Unreachable(String),

    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, ClusterError>;
