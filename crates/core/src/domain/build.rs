use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::timestamp;
use crate::error::{CoreError, Result};

/// Identity of one buildable unit: an entity name and a version string.
///
/// Both parts end up in remote paths and shell arguments, so they are limited
/// to `[A-Za-z0-9._+-]` and may not be `.` or `..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BuildKey {
    entity: String,
    version: String,
}

impl BuildKey {
    pub fn new(entity: impl Into<String>, version: impl Into<String>) -> Result<Self> {
        let entity = entity.into();
        let version = version.into();
        validate_part("entity", &entity)?;
        validate_part("version", &version)?;
        Ok(Self { entity, version })
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

fn validate_part(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CoreError::InvalidKey(format!("{} is empty", kind)));
    }
    if value == "." || value == ".." {
        return Err(CoreError::InvalidKey(format!("{} '{}' is reserved", kind, value)));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-');
    if let Some(bad) = value.chars().find(|c| !allowed(*c)) {
        return Err(CoreError::InvalidKey(format!(
            "{} '{}' contains '{}'",
            kind, value, bad
        )));
    }
    Ok(())
}

impl fmt::Display for BuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.entity, self.version)
    }
}

impl FromStr for BuildKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let (entity, version) = s
            .split_once('@')
            .ok_or_else(|| CoreError::InvalidKey(format!("'{}' is not <entity>@<version>", s)))?;
        Self::new(entity, version)
    }
}

impl TryFrom<String> for BuildKey {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<BuildKey> for String {
    fn from(key: BuildKey) -> Self {
        key.to_string()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Building,
    Completed,
    Failed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Building => "building",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "building" => Some(Self::Building),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a record. A diagnostic exists only on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildState {
    Building,
    Completed,
    Failed { error: Option<String> },
}

impl BuildState {
    pub fn status(&self) -> BuildStatus {
        match self {
            Self::Building => BuildStatus::Building,
            Self::Completed => BuildStatus::Completed,
            Self::Failed { .. } => BuildStatus::Failed,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { error } => error.as_deref(),
            _ => None,
        }
    }
}

/// One ledger entry. Records only come into existence through a submission,
/// so every record carries the scheduler job id of its current episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RecordRepr", into = "RecordRepr")]
pub struct BuildRecord {
    pub state: BuildState,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Consecutive episodes that reported completion without a remote artifact.
    pub inconsistent_completions: u32,
}

impl BuildRecord {
    /// Start a new episode for a freshly submitted job.
    pub fn building(job_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            state: BuildState::Building,
            job_id: job_id.into(),
            started_at: now,
            updated_at: now,
            inconsistent_completions: 0,
        }
    }

    pub fn with_inconsistent_completions(mut self, count: u32) -> Self {
        self.inconsistent_completions = count;
        self
    }

    pub fn status(&self) -> BuildStatus {
        self.state.status()
    }

    pub fn error(&self) -> Option<&str> {
        self.state.error()
    }

    pub fn is_building(&self) -> bool {
        matches!(self.state, BuildState::Building)
    }
}

/// Persisted shape: `{status, job_id, started_at, updated_at, error?}`.
#[derive(Serialize, Deserialize)]
struct RecordRepr {
    status: BuildStatus,
    #[serde(default)]
    job_id: Option<String>,
    #[serde(with = "timestamp")]
    started_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    inconsistent_completions: u32,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl TryFrom<RecordRepr> for BuildRecord {
    type Error = CoreError;

    fn try_from(repr: RecordRepr) -> Result<Self> {
        let job_id = repr
            .job_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CoreError::Validation("record has no job_id".to_string()))?;

        // Older ledgers left a stale error behind after a later completion.
        let state = match repr.status {
            BuildStatus::Building => BuildState::Building,
            BuildStatus::Completed => BuildState::Completed,
            BuildStatus::Failed => BuildState::Failed { error: repr.error },
        };

        Ok(Self {
            state,
            job_id,
            started_at: repr.started_at,
            updated_at: repr.updated_at,
            inconsistent_completions: repr.inconsistent_completions,
        })
    }
}

impl From<BuildRecord> for RecordRepr {
    fn from(record: BuildRecord) -> Self {
        let status = record.status();
        let error = match record.state {
            BuildState::Failed { error } => error,
            _ => None,
        };
        Self {
            status,
            job_id: Some(record.job_id),
            started_at: record.started_at,
            updated_at: record.updated_at,
            error,
            inconsistent_completions: record.inconsistent_completions,
        }
    }
}
