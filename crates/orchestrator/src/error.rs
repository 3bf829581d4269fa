use cluster::ClusterError;
use sifherd_core::CoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid state transition for {key}: {from} -> {to}")]
    InvalidTransition {
        key: String,
        from: String,
        to: String,
    },

    #[error("Build already in progress for {key} (job {job_id})")]
    AlreadyBuilding { key: String, job_id: String },

    #[error("Build record not found: {0}")]
    RecordNotFound(String),

    #[error("Ledger {} is corrupt: {reason}", path.display())]
    LedgerCorrupt { path: PathBuf, reason: String },

    #[error("Ledger is locked by {holder} (pid {pid}) until {expires_at}: {}", path.display())]
    LockHeld {
        path: PathBuf,
        holder: String,
        pid: u32,
        expires_at: String,
    },

    #[error("Remote store unreachable: {0}")]
    RemoteUnreachable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Build definition for {key} not found at {}", path.display())]
    DefinitionNotFound { key: String, path: PathBuf },

    #[error("Domain error: {0}")]
    Core(#[from] CoreError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl OrchestratorError {
    pub fn invalid_transition(
        key: impl ToString,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        Self::InvalidTransition {
            key: key.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Errors that abort a whole cycle rather than a single key.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::LedgerCorrupt { .. }
                | Self::LockHeld { .. }
                | Self::RemoteUnreachable(_)
                | Self::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_display() {
        let error = OrchestratorError::invalid_transition("algo@1.0", "completed", "building");
        assert_eq!(
            error.to_string(),
            "Invalid state transition for algo@1.0: completed -> building"
        );
        assert!(!error.is_setup_error());
    }

    #[test]
    fn test_setup_errors() {
        assert!(OrchestratorError::RemoteUnreachable("alexandria".into()).is_setup_error());
        assert!(OrchestratorError::LedgerCorrupt {
            path: PathBuf::from("build_state.json"),
            reason: "expected value".into(),
        }
        .is_setup_error());
        assert!(!OrchestratorError::Template("unknown placeholder".into()).is_setup_error());
    }
}
