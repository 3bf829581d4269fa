use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a job that is still present in the scheduler queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueState {
    Pending,
    Running,
    Completing,
    Other(String),
}

impl QueueState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "PD" | "CONFIGURING" | "CF" => Self::Pending,
            "RUNNING" | "R" => Self::Running,
            "COMPLETING" | "CG" => Self::Completing,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Terminal or last-known state as reported by scheduler accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountingState {
    Completed,
    Failed,
    Cancelled,
    Timeout,
    NodeFail,
    OutOfMemory,
    Other(String),
}

impl AccountingState {
    /// Parse a raw accounting state such as `COMPLETED` or `CANCELLED by 1234`.
    ///
    /// Accounting tools truncate long states with a trailing `+`.
    pub fn parse(raw: &str) -> Self {
        let upper = raw.trim().to_ascii_uppercase();
        let token = upper
            .split_whitespace()
            .next()
            .unwrap_or("")
            .trim_end_matches('+');
        match token {
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            "CANCELLED" => Self::Cancelled,
            "TIMEOUT" => Self::Timeout,
            "NODE_FAIL" => Self::NodeFail,
            "OUT_OF_MEMORY" | "OUT_OF_ME" => Self::OutOfMemory,
            _ => Self::Other(upper),
        }
    }

    /// Terminal outcome implied by this state, if any.
    pub fn outcome(&self) -> Option<JobOutcome> {
        match self {
            Self::Completed => Some(JobOutcome::Completed),
            Self::Failed | Self::Cancelled | Self::Timeout | Self::NodeFail | Self::OutOfMemory => {
                Some(JobOutcome::Failed)
            }
            Self::Other(_) => None,
        }
    }
}

impl fmt::Display for AccountingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("COMPLETED"),
            Self::Failed => f.write_str("FAILED"),
            Self::Cancelled => f.write_str("CANCELLED"),
            Self::Timeout => f.write_str("TIMEOUT"),
            Self::NodeFail => f.write_str("NODE_FAIL"),
            Self::OutOfMemory => f.write_str("OUT_OF_MEMORY"),
            Self::Other(raw) => f.write_str(raw),
        }
    }
}

/// Best-known fate of a submitted job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Running,
    Completed,
    Failed,
    Unknown,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accounting_state_parsing() {
        assert_eq!(AccountingState::parse("COMPLETED"), AccountingState::Completed);
        assert_eq!(
            AccountingState::parse("CANCELLED by 5001"),
            AccountingState::Cancelled
        );
        assert_eq!(AccountingState::parse("CANCELLED+"), AccountingState::Cancelled);
        assert_eq!(AccountingState::parse(" timeout "), AccountingState::Timeout);
        assert_eq!(
            AccountingState::parse("OUT_OF_MEMORY"),
            AccountingState::OutOfMemory
        );
        assert_eq!(
            AccountingState::parse("REQUEUED"),
            AccountingState::Other("REQUEUED".to_string())
        );
    }

    #[test]
    fn test_accounting_outcome() {
        assert_eq!(
            AccountingState::Completed.outcome(),
            Some(JobOutcome::Completed)
        );
        assert_eq!(AccountingState::NodeFail.outcome(), Some(JobOutcome::Failed));
        assert_eq!(AccountingState::Other("RUNNING".into()).outcome(), None);
    }

    #[test]
    fn test_queue_state_parsing() {
        assert_eq!(QueueState::parse("PENDING"), QueueState::Pending);
        assert_eq!(QueueState::parse("running"), QueueState::Running);
        assert_eq!(
            QueueState::parse("SUSPENDED"),
            QueueState::Other("SUSPENDED".to_string())
        );
    }
}
