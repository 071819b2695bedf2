//! Deadline and cancellation supervision for generator runs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use report_core::JobId;
use tokio_util::sync::CancellationToken;

use crate::generator::{GenerateError, GenerateFuture};

/// Cancellation handles of the jobs currently executing.
#[derive(Debug, Default)]
pub struct RunningJobs {
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl RunningJobs {
    pub fn register(&self, job_id: JobId, token: CancellationToken) {
        self.tokens.lock().insert(job_id, token);
    }

    /// Signal a running job to stop. Returns `false` if it is not running.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        match self.tokens.lock().get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, job_id: &JobId) {
        self.tokens.lock().remove(job_id);
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.tokens.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

/// How a supervised run ended.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Finished(Vec<PathBuf>),
    Failed(GenerateError),
    /// The generator task panicked.
    Panicked(String),
    TimedOut(Duration),
    Cancelled,
}

/// Run a generator future on its own task, bounded by `deadline` and `cancel`.
///
/// On timeout the token is cancelled and the task aborted; work already
/// handed to the blocking pool may keep running but its result is never
/// observed.
pub async fn supervise(
    future: GenerateFuture,
    deadline: Duration,
    cancel: &CancellationToken,
) -> ExecutionOutcome {
    let mut task = tokio::spawn(future);

    tokio::select! {
        joined = tokio::time::timeout(deadline, &mut task) => match joined {
            Ok(Ok(Ok(paths))) => ExecutionOutcome::Finished(paths),
            Ok(Ok(Err(e))) => ExecutionOutcome::Failed(e),
            Ok(Err(e)) => ExecutionOutcome::Panicked(e.to_string()),
            Err(_) => {
                cancel.cancel();
                task.abort();
                ExecutionOutcome::TimedOut(deadline)
            }
        },
        _ = cancel.cancelled() => {
            task.abort();
            ExecutionOutcome::Cancelled
        }
    }
}
