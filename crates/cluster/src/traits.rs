use async_trait::async_trait;
use sifherd_core::{AccountingState, QueueState};
use std::path::Path;

use crate::error::Result;

/// Trait for batch scheduler operations
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    /// Get the name of the scheduler backend
    fn name(&self) -> &'static str;

    /// Submit a materialized job script and return the scheduler job id
    async fn submit(&self, script: &Path) -> Result<String>;

    /// State of the job in the live queue, `None` once it has left the queue
    async fn queue_state(&self, job_id: &str) -> Result<Option<QueueState>>;

    /// State recorded by accounting, `None` when accounting has no answer
    async fn accounting_state(&self, job_id: &str) -> Result<Option<AccountingState>>;
}

/// Trait for the remote artifact store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Get the name of the store backend
    fn name(&self) -> &'static str;

    async fn directory_exists(&self, path: &str) -> Result<bool>;

    async fn file_exists(&self, path: &str) -> Result<bool>;

    /// Create a directory and any missing parents
    async fn create_directory(&self, path: &str) -> Result<()>;
}
