//! Engine error type.

use report_core::{JobId, JobStatus};
use storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The queue is at capacity; the job was not created.
    #[error("queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("job already exists: {0}")]
    DuplicateJob(JobId),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("job {job_id} is {status}; files are available once it completes")]
    JobNotCompleted { job_id: JobId, status: JobStatus },

    #[error("file not found: {filename:?} (job {job_id})")]
    FileNotFound { job_id: JobId, filename: String },

    #[error("service is shutting down")]
    ShuttingDown,

    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to start sweeper: {0}")]
    Spawn(#[from] ractor::SpawnErr),

    #[error("sweep failed: {0}")]
    Sweep(String),
}

impl EngineError {
    /// Errors a caller should surface as "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::JobNotFound(_) | EngineError::FileNotFound { .. }
        )
    }
}
