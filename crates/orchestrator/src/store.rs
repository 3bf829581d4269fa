//! Ledger Store
//!
//! Persists the build ledger as a single JSON object keyed by
//! `<entity>@<version>`:
//!
//! ```json
//! {
//!   "algoX@1.0": {
//!     "status": "failed",
//!     "job_id": "42",
//!     "started_at": "2025-01-01T10:00:00+00:00",
//!     "updated_at": "2025-01-01T11:02:13+00:00",
//!     "error": "scheduler-reported failure"
//!   }
//! }
//! ```
//!
//! Writes go to a temporary sibling file that is renamed over the ledger, so
//! a crash leaves either the old or the new ledger on disk.

use chrono::Utc;
use sifherd_core::{BuildKey, BuildRecord};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info};

use crate::error::{OrchestratorError, Result};
use crate::ledger::Ledger;

/// Store for the build ledger using a JSON file
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ledger".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }

    /// Load the ledger from disk. A missing file is an empty ledger.
    pub async fn load(&self) -> Result<Ledger> {
        if !fs::try_exists(&self.path).await? {
            debug!("No ledger file found at {}", self.path.display());
            return Ok(Ledger::new());
        }

        let content = fs::read_to_string(&self.path).await?;

        let ledger: Ledger = serde_json::from_str(&content).map_err(|e| {
            error!("Failed to parse ledger {}: {}", self.path.display(), e);
            OrchestratorError::LedgerCorrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            }
        })?;

        debug!("Loaded ledger with {} records", ledger.len());
        Ok(ledger)
    }

    /// Save the ledger to disk (atomic write via temp file + rename)
    pub async fn save(&self, ledger: &Ledger) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(ledger).map_err(|e| {
            OrchestratorError::Serialization(format!("Failed to serialize ledger: {}", e))
        })?;

        let temp_path = self.temp_path();
        fs::write(&temp_path, content).await?;
        fs::rename(&temp_path, &self.path).await?;

        debug!(
            "Saved ledger to {} ({} records)",
            self.path.display(),
            ledger.len()
        );
        Ok(())
    }

    /// Record a new submission for `key` and persist it immediately.
    pub async fn mark_building(&self, key: &BuildKey, job_id: &str) -> Result<BuildRecord> {
        let mut ledger = self.load().await?;
        let record = ledger.mark_building(key, job_id, Utc::now())?.clone();
        self.save(&ledger).await?;

        info!(key = %key, job_id, "Recorded submission");
        Ok(record)
    }

    pub async fn mark_completed(&self, key: &BuildKey) -> Result<bool> {
        self.update(|ledger| ledger.mark_completed(key, Utc::now()))
            .await
    }

    pub async fn mark_failed(&self, key: &BuildKey, error: Option<String>) -> Result<bool> {
        self.update(|ledger| ledger.mark_failed(key, error, Utc::now()))
            .await
    }

    /// Remove the record for `key`, making it eligible for a fresh attempt.
    pub async fn clear(&self, key: &BuildKey) -> Result<bool> {
        let removed = self.update(|ledger| Ok(ledger.clear(key))).await?;
        if removed {
            info!(key = %key, "Cleared build record");
        }
        Ok(removed)
    }

    /// Load, mutate and persist when the mutation reports a change.
    async fn update<F>(&self, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut Ledger) -> Result<bool>,
    {
        let mut ledger = self.load().await?;
        let changed = mutate(&mut ledger)?;
        if changed {
            self.save(&ledger).await?;
        }
        Ok(changed)
    }
}
