pub mod command;
pub mod error;
pub mod memory;
pub mod slurm;
pub mod ssh;
pub mod traits;

pub use command::{CommandOutput, CommandRunner};
pub use error::{ClusterError, Result};
pub use memory::{MemoryRemoteStore, MemoryScheduler};
pub use slurm::SlurmScheduler;
pub use ssh::{shell_quote, SshRemoteStore};
pub use traits::{RemoteStore, SchedulerClient};
