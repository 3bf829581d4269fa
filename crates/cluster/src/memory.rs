//! In-memory scheduler and remote store for testing.
//!
//! Both types are thread-safe and let a test script the answers the engine
//! will see: queue and accounting tables, artifact presence, and failures of
//! individual operations.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use sifherd_core::{AccountingState, QueueState};

use crate::error::{ClusterError, Result};
use crate::traits::{RemoteStore, SchedulerClient};

#[derive(Debug, Default)]
struct SchedulerState {
    next_job_id: u64,
    queue: HashMap<String, QueueState>,
    accounting: HashMap<String, AccountingState>,
    submitted: Vec<PathBuf>,
    reject_submissions: bool,
    fail_queue_queries: bool,
    fail_accounting_queries: bool,
}

/// Scripted batch scheduler.
///
/// Submitted jobs enter the queue as pending and receive sequential ids.
#[derive(Debug)]
pub struct MemoryScheduler {
    state: RwLock<SchedulerState>,
}

impl Default for MemoryScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryScheduler {
    pub fn new() -> Self {
        Self::starting_at(1000)
    }

    /// Creates a scheduler whose first submission receives `first_job_id`.
    pub fn starting_at(first_job_id: u64) -> Self {
        Self {
            state: RwLock::new(SchedulerState {
                next_job_id: first_job_id,
                ..SchedulerState::default()
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SchedulerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SchedulerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_queued(&self, job_id: &str, state: QueueState) {
        self.write().queue.insert(job_id.to_string(), state);
    }

    /// Removes a job from the live queue, as when it finishes.
    pub fn dequeue(&self, job_id: &str) {
        self.write().queue.remove(job_id);
    }

    pub fn set_accounting(&self, job_id: &str, state: AccountingState) {
        self.write().accounting.insert(job_id.to_string(), state);
    }

    /// Finishes a job: leaves the queue and records its accounting state.
    pub fn finish(&self, job_id: &str, state: AccountingState) {
        let mut guard = self.write();
        guard.queue.remove(job_id);
        guard.accounting.insert(job_id.to_string(), state);
    }

    pub fn reject_submissions(&self, reject: bool) {
        self.write().reject_submissions = reject;
    }

    pub fn fail_queue_queries(&self, fail: bool) {
        self.write().fail_queue_queries = fail;
    }

    pub fn fail_accounting_queries(&self, fail: bool) {
        self.write().fail_accounting_queries = fail;
    }

    /// Scripts submitted so far, in submission order.
    pub fn submitted(&self) -> Vec<PathBuf> {
        self.read().submitted.clone()
    }

    pub fn queued_jobs(&self) -> Vec<String> {
        let mut jobs: Vec<String> = self.read().queue.keys().cloned().collect();
        jobs.sort();
        jobs
    }
}

#[async_trait]
impl SchedulerClient for MemoryScheduler {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn submit(&self, script: &Path) -> Result<String> {
        let mut guard = self.write();
        if guard.reject_submissions {
            return Err(ClusterError::SubmissionRejected(format!(
                "rejected {}",
                script.display()
            )));
        }

        let job_id = guard.next_job_id.to_string();
        guard.next_job_id += 1;
        guard.queue.insert(job_id.clone(), QueueState::Pending);
        guard.submitted.push(script.to_path_buf());
        Ok(job_id)
    }

    async fn queue_state(&self, job_id: &str) -> Result<Option<QueueState>> {
        let guard = self.read();
        if guard.fail_queue_queries {
            return Err(ClusterError::Timeout {
                command: format!("squeue -j {}", job_id),
                secs: 0,
            });
        }
        Ok(guard.queue.get(job_id).cloned())
    }

    async fn accounting_state(&self, job_id: &str) -> Result<Option<AccountingState>> {
        let guard = self.read();
        if guard.fail_accounting_queries {
            return Err(ClusterError::CommandFailed(format!(
                "sacct -j {}: accounting storage disabled",
                job_id
            )));
        }
        Ok(guard.accounting.get(job_id).cloned())
    }
}

#[derive(Debug, Default)]
struct StoreState {
    files: HashSet<String>,
    directories: HashSet<String>,
    unreachable: bool,
    failing_paths: HashSet<String>,
}

/// Scripted remote artifact store.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    state: RwLock<StoreState>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a file and all of its parent directories.
    pub fn add_file(&self, path: &str) {
        let mut guard = self.write();
        guard.files.insert(path.to_string());
        for parent in parents(path) {
            guard.directories.insert(parent);
        }
    }

    pub fn remove_file(&self, path: &str) {
        self.write().files.remove(path);
    }

    pub fn add_directory(&self, path: &str) {
        let mut guard = self.write();
        guard.directories.insert(path.trim_end_matches('/').to_string());
        for parent in parents(path) {
            guard.directories.insert(parent);
        }
    }

    /// Makes every call fail as if the host could not be reached.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.write().unreachable = unreachable;
    }

    /// Makes probes of one path fail.
    pub fn fail_path(&self, path: &str) {
        self.write().failing_paths.insert(path.to_string());
    }

    pub fn has_directory(&self, path: &str) -> bool {
        self.read().directories.contains(path.trim_end_matches('/'))
    }

    fn check(&self, path: &str) -> Result<()> {
        let guard = self.read();
        if guard.unreachable {
            return Err(ClusterError::Unreachable("memory store".to_string()));
        }
        if guard.failing_paths.contains(path) {
            return Err(ClusterError::Timeout {
                command: format!("probe {}", path),
                secs: 0,
            });
        }
        Ok(())
    }
}

fn parents(path: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = path.trim_end_matches('/');
    while let Some(idx) = current.rfind('/') {
        current = &current[..idx];
        if current.is_empty() {
            break;
        }
        result.push(current.to_string());
    }
    result
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn directory_exists(&self, path: &str) -> Result<bool> {
        self.check(path)?;
        Ok(self.has_directory(path))
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        self.check(path)?;
        Ok(self.read().files.contains(path))
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        self.check(path)?;
        self.add_directory(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scheduler_submit_enqueues() {
        let scheduler = MemoryScheduler::starting_at(42);

        let id = scheduler.submit(Path::new("/jobs/a.sh")).await.unwrap();
        assert_eq!(id, "42");
        assert_eq!(
            scheduler.queue_state("42").await.unwrap(),
            Some(QueueState::Pending)
        );
        assert_eq!(scheduler.submitted(), vec![PathBuf::from("/jobs/a.sh")]);

        let id = scheduler.submit(Path::new("/jobs/b.sh")).await.unwrap();
        assert_eq!(id, "43");
    }

    #[tokio::test]
    async fn test_scheduler_finish() {
        let scheduler = MemoryScheduler::new();
        scheduler.set_queued("7", QueueState::Running);
        scheduler.finish("7", AccountingState::Completed);

        assert_eq!(scheduler.queue_state("7").await.unwrap(), None);
        assert_eq!(
            scheduler.accounting_state("7").await.unwrap(),
            Some(AccountingState::Completed)
        );
        assert_eq!(scheduler.accounting_state("8").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scheduler_injected_failures() {
        let scheduler = MemoryScheduler::new();
        scheduler.reject_submissions(true);
        scheduler.fail_queue_queries(true);
        scheduler.fail_accounting_queries(true);

        assert!(scheduler.submit(Path::new("x.sh")).await.is_err());
        assert!(scheduler.queue_state("1").await.is_err());
        assert!(scheduler.accounting_state("1").await.is_err());
        assert!(scheduler.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_store_files_and_directories() {
        let store = MemoryRemoteStore::new();
        store.add_file("/data/containers/algo/1.0/container.sif");

        assert!(store
            .file_exists("/data/containers/algo/1.0/container.sif")
            .await
            .unwrap());
        assert!(store.directory_exists("/data/containers").await.unwrap());
        assert!(!store.directory_exists("/data/other").await.unwrap());

        store.remove_file("/data/containers/algo/1.0/container.sif");
        assert!(!store
            .file_exists("/data/containers/algo/1.0/container.sif")
            .await
            .unwrap());

        store.create_directory("/data/other/").await.unwrap();
        assert!(store.directory_exists("/data/other").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_failures() {
        let store = MemoryRemoteStore::new();
        store.fail_path("/flaky");
        assert!(matches!(
            store.file_exists("/flaky").await,
            Err(ClusterError::Timeout { .. })
        ));

        store.set_unreachable(true);
        assert!(matches!(
            store.directory_exists("/data").await,
            Err(ClusterError::Unreachable(_))
        ));
    }

    #[test]
    fn test_parents() {
        assert_eq!(
            parents("/a/b/c.sif"),
            vec!["/a/b".to_string(), "/a".to_string()]
        );
        assert!(parents("file").is_empty());
    }
}
