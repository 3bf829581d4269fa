//! Turns planned keys into scheduler jobs.
//!
//! Each key is submitted on its own: a failure to materialize or submit one
//! job leaves its ledger record untouched and does not stop the others. A
//! successful submission is persisted before the next key is attempted.

use cluster::SchedulerClient;
use sifherd_core::BuildKey;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{error, info, warn};

use crate::config::{ResourceProfile, Settings};
use crate::error::{OrchestratorError, Result};
use crate::store::LedgerStore;
use crate::template::{JobParameters, JobTemplate};

const DEFINITION_FILE: &str = "container.def";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub key: BuildKey,
    pub job_id: String,
    pub script: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionFailure {
    pub key: BuildKey,
    pub reason: String,
}

impl fmt::Display for SubmissionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.reason)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionReport {
    pub submitted: Vec<Submitted>,
    pub failures: Vec<SubmissionFailure>,
}

pub struct Submitter {
    scheduler: Arc<dyn SchedulerClient>,
    store: LedgerStore,
    settings: Settings,
}

impl Submitter {
    pub fn new(scheduler: Arc<dyn SchedulerClient>, store: LedgerStore, settings: Settings) -> Self {
        Self {
            scheduler,
            store,
            settings,
        }
    }

    fn is_evaluation(&self, key: &BuildKey) -> bool {
        self.settings.evaluation.enabled
            && key.entity() == self.settings.evaluation.name
            && key.version() == self.settings.evaluation.version
    }

    /// Build definition for `key`: a per-version override when one exists,
    /// otherwise the definition shipped with the entity.
    pub async fn definition_path(&self, key: &BuildKey) -> Result<PathBuf> {
        let path = if self.is_evaluation(key) {
            self.settings
                .source_dir()
                .join(&self.settings.evaluation.definition)
        } else {
            let override_path = self
                .settings
                .overrides_dir()
                .join(key.entity())
                .join(key.version())
                .join(DEFINITION_FILE);
            if fs::try_exists(&override_path).await? {
                info!(key = %key, path = %override_path.display(), "Using definition override");
                override_path
            } else {
                self.settings
                    .algorithms_dir()
                    .join(key.entity())
                    .join(DEFINITION_FILE)
            }
        };

        if !fs::try_exists(&path).await? {
            return Err(OrchestratorError::DefinitionNotFound {
                key: key.to_string(),
                path,
            });
        }
        Ok(path)
    }

    pub fn resources(&self, key: &BuildKey) -> &ResourceProfile {
        if self.is_evaluation(key) {
            &self.settings.evaluation.resources
        } else {
            &self.settings.resources
        }
    }

    pub fn script_path(&self, key: &BuildKey) -> PathBuf {
        self.settings
            .jobs_dir()
            .join(format!("build_{}_{}.sh", key.entity(), key.version()))
    }

    /// Render and write the job script for `key`.
    pub async fn prepare(&self, template: &JobTemplate, key: &BuildKey) -> Result<PathBuf> {
        let definition = self.definition_path(key).await?;
        let params = JobParameters {
            entity_name: key.entity().to_string(),
            version: key.version().to_string(),
            runner_dir: display(&self.settings.paths.runner_dir),
            source_dir: display(&self.settings.source_dir()),
            definition_path: display(&definition),
            remote_host: self.settings.remote.host.clone(),
            remote_path: self.settings.remote.containers_path.clone(),
            resources: self.resources(key).clone(),
        };
        let script = template.render(&params)?;

        let path = self.script_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, script).await?;
        Ok(path)
    }

    /// Submit one key and record the new episode.
    pub async fn submit(&self, template: &JobTemplate, key: &BuildKey) -> Result<Submitted> {
        let script = self.prepare(template, key).await?;
        let job_id = self.scheduler.submit(&script).await?;

        if let Err(e) = self.store.mark_building(key, &job_id).await {
            error!(
                key = %key,
                job_id = %job_id,
                error = %e,
                "Job submitted but not recorded in the ledger"
            );
            return Err(e);
        }

        info!(key = %key, job_id = %job_id, script = %script.display(), "Submitted build");
        Ok(Submitted {
            key: key.clone(),
            job_id,
            script,
        })
    }

    pub async fn submit_all(&self, keys: &[BuildKey]) -> SubmissionReport {
        let mut report = SubmissionReport::default();
        if keys.is_empty() {
            return report;
        }

        let template = match JobTemplate::load(&self.settings.template_path()).await {
            Ok(template) => template,
            Err(e) => {
                warn!(error = %e, "Cannot load job template, nothing submitted");
                report.failures = keys
                    .iter()
                    .map(|key| SubmissionFailure {
                        key: key.clone(),
                        reason: e.to_string(),
                    })
                    .collect();
                return report;
            }
        };

        for key in keys {
            match self.submit(&template, key).await {
                Ok(submitted) => report.submitted.push(submitted),
                Err(e) => {
                    warn!(key = %key, error = %e, "Submission failed");
                    report.failures.push(SubmissionFailure {
                        key: key.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster::MemoryScheduler;
    use sifherd_core::BuildStatus;
    use tempfile::TempDir;

    const TEMPLATE: &str = "#!/bin/bash\n#SBATCH --partition={PARTITION}\n#SBATCH --mem={MEMORY}\nbuild {DEFINITION_PATH} {ENTITY_NAME} {VERSION}\n";

    struct Fixture {
        _temp: TempDir,
        settings: Settings,
        scheduler: Arc<MemoryScheduler>,
        store: LedgerStore,
    }

    async fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.paths.runner_dir = temp.path().to_path_buf();

        let algo_dir = settings.algorithms_dir().join("algoX");
        fs::create_dir_all(&algo_dir).await.unwrap();
        fs::write(algo_dir.join("container.def"), "Bootstrap: docker")
            .await
            .unwrap();
        fs::write(settings.source_dir().join("evaluation.def"), "Bootstrap: docker")
            .await
            .unwrap();

        let template_path = settings.template_path();
        fs::create_dir_all(template_path.parent().unwrap()).await.unwrap();
        fs::write(&template_path, TEMPLATE).await.unwrap();

        Fixture {
            store: LedgerStore::new(settings.ledger_path()),
            scheduler: Arc::new(MemoryScheduler::starting_at(42)),
            settings,
            _temp: temp,
        }
    }

    fn submitter(fx: &Fixture) -> Submitter {
        Submitter::new(fx.scheduler.clone(), fx.store.clone(), fx.settings.clone())
    }

    #[tokio::test]
    async fn test_submit_records_building() {
        let fx = fixture().await;
        let key = BuildKey::new("algoX", "1.0").unwrap();

        let report = submitter(&fx).submit_all(&[key.clone()]).await;
        assert!(report.failures.is_empty());
        assert_eq!(report.submitted[0].job_id, "42");

        let script = fs::read_to_string(&report.submitted[0].script).await.unwrap();
        assert!(script.contains("--partition=one_hour"));
        assert!(script.contains("--mem=16G"));
        assert!(script.contains("algorithms/algoX/container.def algoX 1.0"));
        assert!(report.submitted[0]
            .script
            .ends_with("slurm_jobs/build_algoX_1.0.sh"));

        let ledger = fx.store.load().await.unwrap();
        let record = ledger.get(&key).unwrap();
        assert_eq!(record.status(), BuildStatus::Building);
        assert_eq!(record.job_id, "42");
    }

    #[tokio::test]
    async fn test_override_definition_preferred() {
        let fx = fixture().await;
        let key = BuildKey::new("algoX", "1.0").unwrap();
        let override_dir = fx.settings.overrides_dir().join("algoX").join("1.0");
        fs::create_dir_all(&override_dir).await.unwrap();
        fs::write(override_dir.join("container.def"), "Bootstrap: localimage")
            .await
            .unwrap();

        let path = submitter(&fx).definition_path(&key).await.unwrap();
        assert_eq!(path, override_dir.join("container.def"));
    }

    #[tokio::test]
    async fn test_evaluation_profile() {
        let fx = fixture().await;
        let key = fx.settings.evaluation_key().unwrap();

        let report = submitter(&fx).submit_all(&[key]).await;
        assert!(report.failures.is_empty());

        let script = fs::read_to_string(&report.submitted[0].script).await.unwrap();
        assert!(script.contains("--mem=8G"));
        assert!(script.contains("evaluation.def"));
    }

    #[tokio::test]
    async fn test_per_key_failures_isolated() {
        let fx = fixture().await;
        let missing = BuildKey::new("unknown_algo", "2.0").unwrap();
        let good = BuildKey::new("algoX", "1.0").unwrap();

        let report = submitter(&fx)
            .submit_all(&[missing.clone(), good.clone()])
            .await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].key, missing);
        assert_eq!(report.submitted.len(), 1);

        let ledger = fx.store.load().await.unwrap();
        assert!(ledger.get(&missing).is_none());
        assert!(ledger.get(&good).is_some());
    }

    #[tokio::test]
    async fn test_rejected_submission_leaves_no_record() {
        let fx = fixture().await;
        fx.scheduler.reject_submissions(true);
        let key = BuildKey::new("algoX", "1.0").unwrap();

        let report = submitter(&fx).submit_all(&[key.clone()]).await;
        assert_eq!(report.failures.len(), 1);
        assert!(fx.store.load().await.unwrap().get(&key).is_none());
    }

    #[tokio::test]
    async fn test_missing_template_fails_every_key() {
        let fx = fixture().await;
        fs::remove_file(fx.settings.template_path()).await.unwrap();
        let keys = vec![
            BuildKey::new("algoX", "1.0").unwrap(),
            BuildKey::new("algoY", "1.0").unwrap(),
        ];

        let report = submitter(&fx).submit_all(&keys).await;
        assert_eq!(report.failures.len(), 2);
        assert!(fx.scheduler.submitted().is_empty());
    }
}
