use serde::{Deserialize, Serialize};
use sifherd_core::BuildKey;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::classifier::{DEFAULT_FAILURE_MARKERS, DEFAULT_SUCCESS_MARKERS};
use crate::error::{OrchestratorError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "sifherd.toml";

/// Orchestrator settings, read from `sifherd.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Entity names that are never planned.
    pub excluded: Vec<String>,
    pub remote: RemoteSettings,
    pub paths: PathSettings,
    pub resources: ResourceProfile,
    pub evaluation: EvaluationSettings,
    pub transport: TransportSettings,
    pub retry: RetrySettings,
    pub lock: LockSettings,
    pub classifier: ClassifierSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub host: String,
    pub containers_path: String,
    pub artifact_name: String,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            host: "alexandria".to_string(),
            containers_path: "/data/containers".to_string(),
            artifact_name: "container.sif".to_string(),
        }
    }
}

/// Local paths. Relative entries are resolved against `runner_dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub runner_dir: PathBuf,
    pub source_dir: PathBuf,
    pub template: PathBuf,
    pub jobs_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub overrides_dir: PathBuf,
    pub ledger: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            runner_dir: PathBuf::from("."),
            source_dir: PathBuf::from("denovo_benchmarks"),
            template: PathBuf::from("templates/build_container.slurm.sh"),
            jobs_dir: PathBuf::from("slurm_jobs"),
            logs_dir: PathBuf::from("logs"),
            overrides_dir: PathBuf::from("container_overrides"),
            ledger: PathBuf::from("build_state.json"),
        }
    }
}

/// Scheduler resources requested for one build job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceProfile {
    pub partition: String,
    pub cpus: u32,
    pub memory: String,
    pub time: String,
}

impl Default for ResourceProfile {
    fn default() -> Self {
        Self {
            partition: "one_hour".to_string(),
            cpus: 4,
            memory: "16G".to_string(),
            time: "01:00:00".to_string(),
        }
    }
}

/// The designated evaluation pseudo-entity, built with its own definition
/// and a lighter resource profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationSettings {
    pub enabled: bool,
    pub name: String,
    pub version: String,
    /// Relative to `source_dir`.
    pub definition: PathBuf,
    pub resources: ResourceProfile,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "evaluation".to_string(),
            version: "evaluation".to_string(),
            definition: PathBuf::from("evaluation.def"),
            resources: ResourceProfile {
                memory: "8G".to_string(),
                ..ResourceProfile::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub command_timeout_secs: u64,
    pub max_parallel_calls: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            command_timeout_secs: 60,
            max_parallel_calls: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Consecutive "completed but artifact missing" episodes after which a
    /// key is held instead of resubmitted. Zero means no limit.
    pub max_inconsistent_completions: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_inconsistent_completions: 3,
        }
    }
}

impl RetrySettings {
    pub fn inconsistent_limit(&self) -> Option<u32> {
        (self.max_inconsistent_completions > 0).then_some(self.max_inconsistent_completions)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    pub ttl_secs: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self { ttl_secs: 7200 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub failure_markers: Vec<String>,
    pub success_markers: Vec<String>,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            failure_markers: DEFAULT_FAILURE_MARKERS.iter().map(|m| m.to_string()).collect(),
            success_markers: DEFAULT_SUCCESS_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl Settings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        let mut settings = if tokio::fs::try_exists(path).await? {
            let content = tokio::fs::read_to_string(path).await?;
            let settings: Settings = toml::from_str(&content).map_err(|e| {
                OrchestratorError::Config(format!("Failed to parse {}: {}", path.display(), e))
            })?;
            info!("Loaded configuration from {}", path.display());
            settings
        } else {
            info!("Config file not found: {}, using defaults", path.display());
            Settings::default()
        };

        settings.apply_env_overrides();
        settings.validate()?;
        debug!("Final config: {:?}", settings);
        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| OrchestratorError::Serialization(format!("Failed to render config: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.remote.host.trim().is_empty() {
            return Err(OrchestratorError::Config("remote.host must not be empty".into()));
        }

        if self.remote.containers_path.trim().is_empty() {
            return Err(OrchestratorError::Config(
                "remote.containers_path must not be empty".into(),
            ));
        }

        if self.remote.artifact_name.trim().is_empty() || self.remote.artifact_name.contains('/') {
            return Err(OrchestratorError::Config(
                "remote.artifact_name must be a plain file name".into(),
            ));
        }

        for (name, profile) in [
            ("resources", &self.resources),
            ("evaluation.resources", &self.evaluation.resources),
        ] {
            if profile.cpus == 0 {
                return Err(OrchestratorError::Config(format!(
                    "{}.cpus must be greater than 0",
                    name
                )));
            }
        }

        if self.transport.command_timeout_secs == 0 {
            return Err(OrchestratorError::Config(
                "transport.command_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.transport.max_parallel_calls == 0 {
            return Err(OrchestratorError::Config(
                "transport.max_parallel_calls must be greater than 0".into(),
            ));
        }

        if self.lock.ttl_secs == 0 {
            return Err(OrchestratorError::Config(
                "lock.ttl_secs must be greater than 0".into(),
            ));
        }

        if self.classifier.failure_markers.is_empty() || self.classifier.success_markers.is_empty()
        {
            return Err(OrchestratorError::Config(
                "classifier marker lists must not be empty".into(),
            ));
        }

        if self.evaluation.enabled {
            self.evaluation_key()?;
        }

        Ok(())
    }

    /// Apply `SIFHERD_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("SIFHERD_REMOTE_HOST") {
            self.remote.host = host;
        }

        if let Some(path) = lookup("SIFHERD_CONTAINERS_PATH") {
            self.remote.containers_path = path;
        }

        if let Some(ledger) = lookup("SIFHERD_LEDGER") {
            self.paths.ledger = PathBuf::from(ledger);
        }

        if let Some(timeout) = lookup("SIFHERD_COMMAND_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.transport.command_timeout_secs = secs;
            }
        }
    }

    /// Resolve a configured path against `runner_dir`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.paths.runner_dir.join(path)
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.resolve(&self.paths.ledger)
    }

    pub fn source_dir(&self) -> PathBuf {
        self.resolve(&self.paths.source_dir)
    }

    pub fn algorithms_dir(&self) -> PathBuf {
        self.source_dir().join("algorithms")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.resolve(&self.paths.logs_dir)
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.resolve(&self.paths.jobs_dir)
    }

    pub fn overrides_dir(&self) -> PathBuf {
        self.resolve(&self.paths.overrides_dir)
    }

    pub fn template_path(&self) -> PathBuf {
        self.resolve(&self.paths.template)
    }

    pub fn evaluation_key(&self) -> Result<BuildKey> {
        Ok(BuildKey::new(
            self.evaluation.name.as_str(),
            self.evaluation.version.as_str(),
        )?)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.transport.command_timeout_secs)
    }

    pub fn lock_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.lock.ttl_secs).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.resources.memory, "16G");
        assert_eq!(settings.evaluation.resources.memory, "8G");
        assert_eq!(settings.retry.inconsistent_limit(), Some(3));

        let unlimited = RetrySettings {
            max_inconsistent_completions: 0,
        };
        assert_eq!(unlimited.inconsistent_limit(), None);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: Settings = toml::from_str(
            r#"
excluded = ["legacy_algo"]

[remote]
host = "storage01"

[resources]
cpus = 8
"#,
        )
        .unwrap();

        assert_eq!(settings.excluded, vec!["legacy_algo".to_string()]);
        assert_eq!(settings.remote.host, "storage01");
        assert_eq!(settings.remote.artifact_name, "container.sif");
        assert_eq!(settings.resources.cpus, 8);
        assert_eq!(settings.resources.partition, "one_hour");
        assert_eq!(settings.transport.command_timeout_secs, 60);
    }

    #[test]
    fn test_validation_failures() {
        let mut settings = Settings::default();
        settings.transport.max_parallel_calls = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.remote.host = " ".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.evaluation.name = "bad name".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.evaluation.enabled = false;
        settings.evaluation.name = "bad name".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SIFHERD_REMOTE_HOST", "backup-host"),
            ("SIFHERD_COMMAND_TIMEOUT_SECS", "15"),
            ("SIFHERD_LEDGER", "/var/lib/sifherd/state.json"),
        ]);
        let mut settings = Settings::default();
        settings.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(settings.remote.host, "backup-host");
        assert_eq!(settings.command_timeout(), Duration::from_secs(15));
        assert_eq!(
            settings.ledger_path(),
            PathBuf::from("/var/lib/sifherd/state.json")
        );
    }

    #[test]
    fn test_path_resolution() {
        let mut settings = Settings::default();
        settings.paths.runner_dir = PathBuf::from("/opt/runner");

        assert_eq!(
            settings.ledger_path(),
            PathBuf::from("/opt/runner/build_state.json")
        );
        assert_eq!(
            settings.algorithms_dir(),
            PathBuf::from("/opt/runner/denovo_benchmarks/algorithms")
        );
    }

    #[tokio::test]
    async fn test_load_missing_and_malformed() {
        let temp = TempDir::new().unwrap();

        let settings = Settings::load(&temp.path().join("absent.toml")).await.unwrap();
        assert_eq!(settings.remote.containers_path, "/data/containers");

        let bad = temp.path().join("bad.toml");
        tokio::fs::write(&bad, "[remote\nhost = 1").await.unwrap();
        let err = Settings::load(&bad).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[test]
    fn test_toml_round_trip() {
        let settings = Settings::default();
        let rendered = settings.to_toml().unwrap();
        let parsed: Settings = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, settings);
    }
}
