mod build;
mod job;
pub mod timestamp;

pub use build::{BuildKey, BuildRecord, BuildState, BuildStatus};
pub use job::{AccountingState, JobOutcome, QueueState};
