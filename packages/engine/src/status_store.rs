//! In-memory job status records.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use report_core::{JobId, JobRecord, JobStatus, JobSubmission, StatusUpdate, UpdateOutcome};

use crate::EngineError;

/// Thread-safe map of job ID to status record.
///
/// Every read returns a snapshot; updates are merged under the lock so
/// readers never observe a half-applied change.
#[derive(Debug, Default)]
pub struct StatusStore {
    records: Mutex<HashMap<JobId, JobRecord>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the queued record for a new submission.
    pub fn create(&self, submission: &JobSubmission) -> Result<JobRecord, EngineError> {
        let mut records = self.records.lock();
        match records.entry(submission.id.clone()) {
            Entry::Occupied(_) => Err(EngineError::DuplicateJob(submission.id.clone())),
            Entry::Vacant(slot) => Ok(slot.insert(JobRecord::queued(submission)).clone()),
        }
    }

    pub fn get(&self, job_id: &JobId) -> Option<JobRecord> {
        self.records.lock().get(job_id).cloned()
    }

    /// Merge an update into a record.
    ///
    /// Updates for unknown jobs and updates rejected by the lifecycle are
    /// ignored and reported through the returned outcome.
    pub fn update(&self, job_id: &JobId, update: StatusUpdate) -> UpdateOutcome {
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(job_id) else {
            tracing::debug!("Ignoring status update for unknown job {}", job_id);
            return UpdateOutcome::Missing;
        };
        let outcome = record.apply(update, Utc::now());
        if !outcome.is_applied() {
            tracing::debug!("Status update for job {} skipped: {:?}", job_id, outcome);
        }
        outcome
    }

    pub fn remove(&self, job_id: &JobId) -> Option<JobRecord> {
        self.records.lock().remove(job_id)
    }

    /// IDs of all queued or running jobs.
    pub fn list_active(&self) -> HashSet<JobId> {
        self.records
            .lock()
            .values()
            .filter(|record| record.status.is_active())
            .map(|record| record.id.clone())
            .collect()
    }

    /// Drop terminal records that completed before `cutoff`.
    ///
    /// Active records are never evicted. Returns the number removed.
    pub fn evict_terminal_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, record| {
            !(record.status.is_terminal()
                && record.completed_at.is_some_and(|completed| completed < cutoff))
        });
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
