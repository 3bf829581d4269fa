use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::Result;

/// Source of a job's captured output stream.
#[async_trait]
pub trait JobLogSource: Send + Sync {
    /// Captured output for `job_id`, `None` when nothing was captured.
    async fn read_log(&self, job_id: &str) -> Result<Option<String>>;
}

/// Build logs written by the job template as `build_<entity>_<version>_<job_id>.err`.
#[derive(Debug, Clone)]
pub struct LogDirectory {
    dir: PathBuf,
}

impl LogDirectory {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub async fn find(&self, job_id: &str) -> Result<Option<PathBuf>> {
        if !fs::try_exists(&self.dir).await? {
            return Ok(None);
        }

        let suffix = format!("_{}.err", job_id);
        let mut matches = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("build_") && name.ends_with(&suffix) {
                matches.push(entry.path());
            }
        }

        matches.sort();
        Ok(matches.into_iter().next())
    }
}

#[async_trait]
impl JobLogSource for LogDirectory {
    async fn read_log(&self, job_id: &str) -> Result<Option<String>> {
        let Some(path) = self.find(job_id).await? else {
            debug!(job_id, dir = %self.dir.display(), "No captured log");
            return Ok(None);
        };

        let bytes = fs::read(&path).await?;
        debug!(job_id, path = %path.display(), "Read captured log");
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reads_matching_log() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("build_algoX_1.0_42.err"), "FATAL: boom")
            .await
            .unwrap();
        fs::write(temp.path().join("build_algoX_1.0_142.err"), "other job")
            .await
            .unwrap();
        fs::write(temp.path().join("build_algoX_1.0_42.out"), "stdout")
            .await
            .unwrap();

        let logs = LogDirectory::new(temp.path());
        assert_eq!(
            logs.read_log("42").await.unwrap().as_deref(),
            Some("FATAL: boom")
        );
    }

    #[tokio::test]
    async fn test_missing_log() {
        let temp = TempDir::new().unwrap();
        let logs = LogDirectory::new(temp.path());
        assert!(logs.read_log("42").await.unwrap().is_none());

        let logs = LogDirectory::new(temp.path().join("does-not-exist"));
        assert!(logs.read_log("42").await.unwrap().is_none());
    }
}
