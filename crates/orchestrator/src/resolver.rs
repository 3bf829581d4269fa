//! Job outcome resolution.
//!
//! Strict order, stopping at the first definitive answer:
//! 1. live queue: a queued or running job is `Running`, whatever else says
//! 2. scheduler accounting: mapped terminal states
//! 3. captured log: failure markers, then success markers
//!
//! Anything else is `Unknown`, and the record stays building until a later
//! cycle learns more.

use cluster::SchedulerClient;
use futures::stream::{self, StreamExt};
use sifherd_core::{AccountingState, BuildKey, JobOutcome, QueueState};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::classifier::{LogOutcomeClassifier, LogVerdict};
use crate::logs::JobLogSource;

/// Where a resolution came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionSource {
    Queue(QueueState),
    Accounting(AccountingState),
    LogMarker(String),
    /// Accounting and logs had nothing conclusive.
    NoEvidence,
    /// The queue could not be queried this cycle.
    Transient(String),
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue(state) => write!(f, "queue: {:?}", state),
            Self::Accounting(state) => write!(f, "accounting: {}", state),
            Self::LogMarker(marker) => write!(f, "log: {}", marker),
            Self::NoEvidence => f.write_str("no conclusive evidence"),
            Self::Transient(reason) => write!(f, "queue query failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub outcome: JobOutcome,
    pub source: ResolutionSource,
}

impl Resolution {
    pub fn new(outcome: JobOutcome, source: ResolutionSource) -> Self {
        Self { outcome, source }
    }
}

pub struct JobResolver {
    scheduler: Arc<dyn SchedulerClient>,
    logs: Arc<dyn JobLogSource>,
    classifier: LogOutcomeClassifier,
}

impl JobResolver {
    pub fn new(
        scheduler: Arc<dyn SchedulerClient>,
        logs: Arc<dyn JobLogSource>,
        classifier: LogOutcomeClassifier,
    ) -> Self {
        Self {
            scheduler,
            logs,
            classifier,
        }
    }

    pub async fn resolve(&self, job_id: &str) -> Resolution {
        match self.scheduler.queue_state(job_id).await {
            Ok(Some(state)) => {
                return Resolution::new(JobOutcome::Running, ResolutionSource::Queue(state));
            }
            Ok(None) => {}
            Err(e) => {
                // The job may still be writing its log; judge it next cycle
                warn!(job_id, error = %e, "Queue query failed");
                return Resolution::new(
                    JobOutcome::Unknown,
                    ResolutionSource::Transient(e.to_string()),
                );
            }
        }

        match self.scheduler.accounting_state(job_id).await {
            Ok(Some(state)) => {
                if let Some(outcome) = state.outcome() {
                    return Resolution::new(outcome, ResolutionSource::Accounting(state));
                }
                debug!(job_id, state = %state, "Accounting state inconclusive");
            }
            Ok(None) => debug!(job_id, "No accounting record"),
            Err(e) => debug!(job_id, error = %e, "Accounting unavailable"),
        }

        let content = match self.logs.read_log(job_id).await {
            Ok(Some(content)) => content,
            Ok(None) => return Resolution::new(JobOutcome::Unknown, ResolutionSource::NoEvidence),
            Err(e) => {
                warn!(job_id, error = %e, "Failed to read captured log");
                return Resolution::new(
                    JobOutcome::Unknown,
                    ResolutionSource::Transient(e.to_string()),
                );
            }
        };

        match self.classifier.classify(&content) {
            LogVerdict::Failed { marker } => {
                Resolution::new(JobOutcome::Failed, ResolutionSource::LogMarker(marker))
            }
            LogVerdict::Completed { marker } => {
                Resolution::new(JobOutcome::Completed, ResolutionSource::LogMarker(marker))
            }
            LogVerdict::Inconclusive => {
                Resolution::new(JobOutcome::Unknown, ResolutionSource::NoEvidence)
            }
        }
    }

    /// Resolve many jobs with at most `max_parallel` in flight.
    pub async fn resolve_all(
        &self,
        jobs: Vec<(BuildKey, String)>,
        max_parallel: usize,
    ) -> HashMap<BuildKey, Resolution> {
        stream::iter(jobs)
            .map(|(key, job_id)| async move {
                let resolution = self.resolve(&job_id).await;
                debug!(
                    key = %key,
                    job_id = %job_id,
                    outcome = %resolution.outcome,
                    source = %resolution.source,
                    "Resolved job"
                );
                (key, resolution)
            })
            .buffer_unordered(max_parallel.max(1))
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;
    use cluster::MemoryScheduler;

    struct StaticLogs(Option<&'static str>);

    #[async_trait]
    impl JobLogSource for StaticLogs {
        async fn read_log(&self, _job_id: &str) -> Result<Option<String>> {
            Ok(self.0.map(str::to_string))
        }
    }

    fn resolver(scheduler: Arc<MemoryScheduler>, log: Option<&'static str>) -> JobResolver {
        JobResolver::new(
            scheduler,
            Arc::new(StaticLogs(log)),
            LogOutcomeClassifier::default(),
        )
    }

    #[tokio::test]
    async fn test_queue_short_circuits() {
        let scheduler = Arc::new(MemoryScheduler::new());
        scheduler.set_queued("42", QueueState::Running);
        scheduler.set_accounting("42", AccountingState::Failed);

        let resolution = resolver(scheduler, Some("FATAL: boom")).resolve("42").await;
        assert_eq!(resolution.outcome, JobOutcome::Running);
        assert_eq!(
            resolution.source,
            ResolutionSource::Queue(QueueState::Running)
        );
    }

    #[tokio::test]
    async fn test_accounting_mapping() {
        let scheduler = Arc::new(MemoryScheduler::new());
        scheduler.set_accounting("1", AccountingState::Completed);
        scheduler.set_accounting("2", AccountingState::OutOfMemory);
        scheduler.set_accounting("3", AccountingState::Cancelled);
        let resolver = resolver(scheduler, None);

        assert_eq!(resolver.resolve("1").await.outcome, JobOutcome::Completed);
        assert_eq!(resolver.resolve("2").await.outcome, JobOutcome::Failed);
        assert_eq!(resolver.resolve("3").await.outcome, JobOutcome::Failed);
    }

    #[tokio::test]
    async fn test_unmapped_accounting_falls_back_to_log() {
        let scheduler = Arc::new(MemoryScheduler::new());
        scheduler.set_accounting("42", AccountingState::Other("REQUEUED".into()));

        let resolution = resolver(scheduler, Some("Container Build Complete!"))
            .resolve("42")
            .await;
        assert_eq!(resolution.outcome, JobOutcome::Completed);
        assert!(matches!(resolution.source, ResolutionSource::LogMarker(_)));
    }

    #[tokio::test]
    async fn test_accounting_error_falls_back_to_log() {
        let scheduler = Arc::new(MemoryScheduler::new());
        scheduler.fail_accounting_queries(true);

        let resolution = resolver(scheduler, Some("FATAL: no space left on device"))
            .resolve("42")
            .await;
        assert_eq!(resolution.outcome, JobOutcome::Failed);
        assert_eq!(
            resolution.source,
            ResolutionSource::LogMarker("FATAL:".to_string())
        );
    }

    #[tokio::test]
    async fn test_no_evidence_is_unknown() {
        let scheduler = Arc::new(MemoryScheduler::new());

        let resolution = resolver(scheduler.clone(), None).resolve("42").await;
        assert_eq!(resolution.outcome, JobOutcome::Unknown);
        assert_eq!(resolution.source, ResolutionSource::NoEvidence);

        let resolution = resolver(scheduler, Some("still copying layers"))
            .resolve("42")
            .await;
        assert_eq!(resolution.outcome, JobOutcome::Unknown);
    }

    #[tokio::test]
    async fn test_queue_error_is_unknown() {
        let scheduler = Arc::new(MemoryScheduler::new());
        scheduler.fail_queue_queries(true);
        scheduler.set_accounting("42", AccountingState::Completed);

        let resolution = resolver(scheduler, None).resolve("42").await;
        assert_eq!(resolution.outcome, JobOutcome::Unknown);
        assert!(matches!(resolution.source, ResolutionSource::Transient(_)));
    }

    #[tokio::test]
    async fn test_resolve_all() {
        let scheduler = Arc::new(MemoryScheduler::new());
        scheduler.set_queued("1", QueueState::Pending);
        scheduler.set_accounting("2", AccountingState::Timeout);
        let resolver = resolver(scheduler, None);

        let a = BuildKey::new("a", "1").unwrap();
        let b = BuildKey::new("b", "1").unwrap();
        let results = resolver
            .resolve_all(
                vec![(a.clone(), "1".to_string()), (b.clone(), "2".to_string())],
                1,
            )
            .await;

        assert_eq!(results[&a].outcome, JobOutcome::Running);
        assert_eq!(results[&b].outcome, JobOutcome::Failed);
    }
}
