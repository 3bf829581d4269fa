//! Advisory lock around a ledger.
//!
//! One orchestrator invocation at a time may run the
//! load-reconcile-plan-submit-save sequence. The lock is a sibling file
//! `<ledger>.lock` created with create-if-absent semantics and removed when
//! the guard is released or dropped. A lock whose TTL has passed is assumed
//! to belong to a crashed invocation and is taken over.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// Contents of the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub holder_id: Uuid,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    fn new(ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            holder_id: Uuid::new_v4(),
            pid: std::process::id(),
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// RAII guard for the ledger lock.
#[derive(Debug)]
pub struct LedgerLock {
    path: PathBuf,
    info: LockInfo,
    released: bool,
}

impl LedgerLock {
    pub fn lock_path(ledger_path: &Path) -> PathBuf {
        let mut name = ledger_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        ledger_path.with_file_name(name)
    }

    /// Acquire the lock for `ledger_path`, taking over an expired one.
    pub async fn acquire(ledger_path: &Path, ttl: Duration) -> Result<Self> {
        let path = Self::lock_path(ledger_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        // Retries only happen after an expired lock was moved aside or a
        // holder released between our create and read
        for _ in 0..3 {
            match Self::try_create(&path, ttl).await {
                Ok(lock) => return Ok(lock),
                Err(OrchestratorError::Io(e)) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e),
            }

            let existing = match Self::read_info(&path).await {
                Ok(info) => info,
                Err(OrchestratorError::Io(e)) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if !existing.is_expired() {
                return Err(Self::held(path, &existing));
            }

            warn!(
                path = %path.display(),
                holder = %existing.holder_id,
                pid = existing.pid,
                expired_at = %existing.expires_at,
                "Taking over expired ledger lock"
            );
            Self::take_over(&path, &existing).await?;
        }

        let existing = Self::read_info(&path).await?;
        Err(Self::held(path, &existing))
    }

    fn held(path: PathBuf, info: &LockInfo) -> OrchestratorError {
        OrchestratorError::LockHeld {
            path,
            holder: info.holder_id.to_string(),
            pid: info.pid,
            expires_at: info.expires_at.to_rfc3339(),
        }
    }

    /// Remove the expired lock `observed`, and nothing else.
    ///
    /// The lock file is renamed to a unique sibling before it is inspected,
    /// so a lock written by another invocation that took over first is never
    /// deleted: it is linked back into place instead. Returns whether the
    /// observed lock was removed.
    async fn take_over(path: &Path, observed: &LockInfo) -> Result<bool> {
        let mut aside = path.as_os_str().to_os_string();
        aside.push(format!(".stale.{}", Uuid::new_v4()));
        let aside = PathBuf::from(aside);

        match fs::rename(path, &aside).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        let moved = Self::read_info(&aside).await.ok();
        if moved.as_ref().map(|info| info.holder_id) == Some(observed.holder_id) {
            fs::remove_file(&aside).await?;
            return Ok(true);
        }

        // Someone else's lock: put it back without clobbering a newer one
        match fs::hard_link(&aside, path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!(path = %path.display(), "Lock replaced while restoring it");
            }
            Err(e) => return Err(e.into()),
        }
        fs::remove_file(&aside).await?;
        debug!(path = %path.display(), "Lock was taken over by another invocation");
        Ok(false)
    }

    async fn try_create(path: &Path, ttl: Duration) -> Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;

        let info = LockInfo::new(ttl);
        let content = serde_json::to_vec_pretty(&info)
            .map_err(|e| OrchestratorError::Serialization(format!("Failed to serialize lock: {}", e)))?;
        file.write_all(&content).await?;
        file.flush().await?;

        debug!(path = %path.display(), holder = %info.holder_id, "Acquired ledger lock");
        Ok(Self {
            path: path.to_path_buf(),
            info,
            released: false,
        })
    }

    async fn read_info(path: &Path) -> Result<LockInfo> {
        let content = fs::read_to_string(path).await?;
        serde_json::from_str(&content).map_err(|e| {
            OrchestratorError::Serialization(format!(
                "Unreadable lock file {}: {}. If no other sifherd run is active, remove it manually",
                path.display(),
                e
            ))
        })
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock, reporting a failure to remove the lock file.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(path = %self.path.display(), "Released ledger lock");
        Ok(())
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove ledger lock");
            }
        }
    }
}
