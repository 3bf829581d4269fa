//! In-memory view of the build ledger.
//!
//! All record mutation goes through the methods here so that the
//! one-live-job-per-key rule and forward-only transitions hold for every
//! caller. Persistence lives in [`crate::store`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sifherd_core::{BuildKey, BuildRecord, BuildState, BuildStatus};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{OrchestratorError, Result};
use crate::state_machine::BuildStateMachine;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    records: BTreeMap<BuildKey, BuildRecord>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &BuildKey) -> Option<&BuildRecord> {
        self.records.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BuildKey, &BuildRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &BuildKey> {
        self.records.keys()
    }

    pub fn count(&self, status: BuildStatus) -> usize {
        self.records
            .values()
            .filter(|record| record.status() == status)
            .count()
    }

    /// `(key, job_id)` of every record currently building.
    pub fn building_jobs(&self) -> Vec<(BuildKey, String)> {
        self.records
            .iter()
            .filter(|(_, record)| record.is_building())
            .map(|(key, record)| (key.clone(), record.job_id.clone()))
            .collect()
    }

    /// Start a new episode for `key` with a freshly submitted job.
    ///
    /// Overwrites any terminal record and clears its diagnostic. Refuses to
    /// replace a record that is still building.
    pub fn mark_building(
        &mut self,
        key: &BuildKey,
        job_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<&BuildRecord> {
        let carried = match self.records.get(key) {
            Some(existing) if existing.is_building() => {
                return Err(OrchestratorError::AlreadyBuilding {
                    key: key.to_string(),
                    job_id: existing.job_id.clone(),
                });
            }
            Some(existing) => existing.inconsistent_completions,
            None => 0,
        };

        let record = BuildRecord::building(job_id, now).with_inconsistent_completions(carried);
        debug!(key = %key, job_id = %record.job_id, "Marked building");
        let slot = match self.records.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                entry.insert(record);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(record),
        };
        Ok(slot)
    }

    /// Returns whether the record changed.
    pub fn mark_completed(&mut self, key: &BuildKey, now: DateTime<Utc>) -> Result<bool> {
        self.transition(key, BuildState::Completed, now, |_| 0)
    }

    /// Record a failure. Clears the inconsistent-completion streak.
    pub fn mark_failed(
        &mut self,
        key: &BuildKey,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.transition(key, BuildState::Failed { error }, now, |_| 0)
    }

    /// Record a failure where the job claimed success but no artifact was
    /// published, extending the inconsistent-completion streak.
    pub fn mark_failed_inconsistent(
        &mut self,
        key: &BuildKey,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let state = BuildState::Failed {
            error: Some(error.into()),
        };
        self.transition(key, state, now, |count| count.saturating_add(1))
    }

    /// Remove the record for `key`. Returns whether one existed.
    pub fn clear(&mut self, key: &BuildKey) -> bool {
        self.records.remove(key).is_some()
    }

    fn transition(
        &mut self,
        key: &BuildKey,
        to: BuildState,
        now: DateTime<Utc>,
        streak: impl FnOnce(u32) -> u32,
    ) -> Result<bool> {
        let record = self
            .records
            .get_mut(key)
            .ok_or_else(|| OrchestratorError::RecordNotFound(key.to_string()))?;

        if record.state == to {
            return Ok(false);
        }

        let from = record.status();
        if from != to.status() {
            BuildStateMachine::validate_transition(key, &from, &to.status())?;
        }

        debug!(key = %key, from = %from, to = %to.status(), "Ledger transition");
        record.state = to;
        record.updated_at = now;
        record.inconsistent_completions = streak(record.inconsistent_completions);
        Ok(true)
    }
}
