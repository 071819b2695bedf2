//! Health snapshot of the queue, workers and artifact storage.

use serde::{Deserialize, Serialize};

/// Overall service state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    /// Free disk space is below the configured threshold or unknown.
    Degraded,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Degraded => write!(f, "degraded"),
        }
    }
}

/// Point-in-time health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub state: HealthState,
    /// Submissions waiting in the queue, including cancelled ones not yet skipped.
    pub queue_size: usize,
    /// Jobs currently executing.
    pub active_jobs: usize,
    /// Workers not executing a job.
    pub available_workers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_disk_bytes: Option<u64>,
    pub total_files: usize,
}
