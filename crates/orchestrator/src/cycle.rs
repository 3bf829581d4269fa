//! One orchestration cycle: observe, reconcile, plan, act.
//!
//! The ledger lock is held from load to the last submission so that two
//! overlapping invocations can never both see a key as idle and submit it.
//! A dry run only reads, so it runs without the lock.

use cluster::{CommandRunner, RemoteStore, SchedulerClient, SlurmScheduler, SshRemoteStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::catalog::{EntityCatalog, VersionsLogCatalog};
use crate::classifier::LogOutcomeClassifier;
use crate::config::Settings;
use crate::error::Result;
use crate::lock::LedgerLock;
use crate::logs::{JobLogSource, LogDirectory};
use crate::planner::SubmissionPlanner;
use crate::reconcile::{ReconciliationEngine, TransitionCause};
use crate::remote::{RemoteLayout, RemoteProbe};
use crate::resolver::JobResolver;
use crate::store::LedgerStore;
use crate::submission::{SubmissionReport, Submitter};
use crate::summary::CycleSummary;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOptions {
    pub dry_run: bool,
}

/// Drives a single reconcile-plan-submit cycle against the configured
/// scheduler and remote store.
pub struct Cycle {
    settings: Settings,
    scheduler: Arc<dyn SchedulerClient>,
    remote: Arc<dyn RemoteStore>,
    logs: Arc<dyn JobLogSource>,
    catalog: Arc<dyn EntityCatalog>,
}

impl Cycle {
    pub fn new(
        settings: Settings,
        scheduler: Arc<dyn SchedulerClient>,
        remote: Arc<dyn RemoteStore>,
        logs: Arc<dyn JobLogSource>,
        catalog: Arc<dyn EntityCatalog>,
    ) -> Self {
        Self {
            settings,
            scheduler,
            remote,
            logs,
            catalog,
        }
    }

    /// Wire the Slurm scheduler, the SSH remote store, the captured log
    /// directory and the manifest catalog from `settings`.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let runner = CommandRunner::new(settings.command_timeout())
            .with_current_dir(settings.paths.runner_dir.clone());
        let scheduler = Arc::new(SlurmScheduler::new(runner.clone()));
        let remote = Arc::new(SshRemoteStore::new(settings.remote.host.clone(), runner));
        let logs = Arc::new(LogDirectory::new(settings.logs_dir()));

        let mut catalog = VersionsLogCatalog::new(settings.algorithms_dir())
            .with_excluded(settings.excluded.iter().cloned());
        if settings.evaluation.enabled {
            catalog = catalog.with_extra(settings.evaluation_key()?);
        }

        Ok(Self::new(
            settings,
            scheduler,
            remote,
            logs,
            Arc::new(catalog),
        ))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> LedgerStore {
        LedgerStore::new(self.settings.ledger_path())
    }

    pub async fn run(&self, options: CycleOptions) -> Result<CycleSummary> {
        let store = self.store();
        let lock = if options.dry_run {
            None
        } else {
            Some(LedgerLock::acquire(store.path(), self.settings.lock_ttl()).await?)
        };

        let summary = self.run_cycle(&store, options).await?;

        if let Some(lock) = lock {
            lock.release().await?;
        }
        Ok(summary)
    }

    async fn run_cycle(&self, store: &LedgerStore, options: CycleOptions) -> Result<CycleSummary> {
        let max_parallel = self.settings.transport.max_parallel_calls;

        let mut ledger = store.load().await?;
        let entities = self.catalog.entities().await?;
        info!(
            entities = entities.len(),
            records = ledger.len(),
            dry_run = options.dry_run,
            "Starting cycle"
        );

        let probe = RemoteProbe::new(
            self.remote.clone(),
            RemoteLayout::new(
                self.settings.remote.containers_path.clone(),
                self.settings.remote.artifact_name.clone(),
            ),
            max_parallel,
        );
        // Every recorded key is checked, so a record whose entity left the
        // catalog still converges to the remote store
        let keys: BTreeSet<_> = entities.iter().chain(ledger.keys()).collect();
        let remote = probe.probe(keys).await?;

        let resolver = JobResolver::new(
            self.scheduler.clone(),
            self.logs.clone(),
            LogOutcomeClassifier::from_settings(&self.settings.classifier),
        );
        let report = ReconciliationEngine::new(resolver, max_parallel)
            .reconcile(&mut ledger, &remote)
            .await?;

        if report.changed() {
            if options.dry_run {
                debug!(
                    transitions = report.transitions.len(),
                    "Dry run, ledger changes not persisted"
                );
            } else {
                store.save(&ledger).await?;
            }
        }

        let plan = SubmissionPlanner::new(self.settings.retry.inconsistent_limit())
            .plan(&entities, &remote, &ledger);
        let still_building = ledger.building_jobs();

        let submissions = if options.dry_run || plan.is_empty() {
            SubmissionReport::default()
        } else {
            Submitter::new(self.scheduler.clone(), store.clone(), self.settings.clone())
                .submit_all(&plan.keys())
                .await
        };

        let (newly_completed, newly_failed): (Vec<_>, Vec<_>) =
            report.transitions.into_iter().partition(|t| {
                matches!(
                    t.cause,
                    TransitionCause::ArtifactPresent | TransitionCause::JobCompleted
                )
            });

        let summary = CycleSummary {
            dry_run: options.dry_run,
            entities: entities.len(),
            newly_completed,
            newly_failed,
            still_building,
            warnings: report.warnings,
            planned: plan.builds,
            submitted: submissions.submitted,
            submission_failures: submissions.failures,
            held: plan.held,
        };

        info!(
            completed = summary.newly_completed.len(),
            failed = summary.newly_failed.len(),
            building = summary.still_building.len(),
            submitted = summary.submitted.len(),
            held = summary.held.len(),
            "Cycle finished"
        );
        Ok(summary)
    }
}
