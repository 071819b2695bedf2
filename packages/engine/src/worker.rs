//! Worker pool executing queued jobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use report_core::{JobId, JobStatus, JobSubmission, StatusUpdate, UpdateOutcome};
use storage::FileStore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::generator::{GenerateRequest, GeneratorRegistry, ProgressReporter};
use crate::queue::{JobQueue, QueuedJob};
use crate::status_store::StatusStore;
use crate::supervisor::{ExecutionOutcome, RunningJobs, supervise};

/// Message recorded on jobs interrupted by shutdown.
pub const SHUTDOWN_MESSAGE: &str = "Cancelled: service shutting down";

/// Shared collaborators handed to every worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: JobQueue,
    pub store: Arc<StatusStore>,
    pub files: Arc<FileStore>,
    pub generators: Arc<GeneratorRegistry>,
    pub running: Arc<RunningJobs>,
    pub job_timeout: Duration,
    pub poll_interval: Duration,
}

/// Fixed set of worker tasks pulling from one queue.
pub struct WorkerPool {
    worker_count: usize,
    busy: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
    tasks: Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            busy: Arc::new(AtomicUsize::new(0)),
            cancellation_token: CancellationToken::new(),
            tasks: Mutex::new(None),
        }
    }

    /// Spawn the workers. Calling this on a running pool does nothing.
    pub fn start(&self, ctx: WorkerContext) {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() || self.cancellation_token.is_cancelled() {
            return;
        }

        let mut join_set = JoinSet::new();
        for index in 0..self.worker_count {
            let ctx = ctx.clone();
            let token = self.cancellation_token.clone();
            let busy = Arc::clone(&self.busy);
            join_set.spawn(worker_loop(index, ctx, token, busy));
        }
        *tasks = Some(join_set);
        tracing::info!("Started {} report workers", self.worker_count);
    }

    /// Signal every worker to stop and wait up to `grace` for them to exit.
    ///
    /// Running jobs observe the cancellation through their tokens. Workers
    /// still alive after `grace` are aborted. Returns `true` when all
    /// workers exited on their own.
    pub async fn stop(&self, grace: Duration) -> bool {
        self.cancellation_token.cancel();
        let Some(mut join_set) = self.tasks.lock().take() else {
            return true;
        };

        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = join_set.join_next().await {
                if let Err(e) = result {
                    tracing::error!("Worker task ended abnormally: {}", e);
                }
            }
        })
        .await;

        match drained {
            Ok(()) => {
                tracing::info!("All report workers stopped");
                true
            }
            Err(_) => {
                tracing::warn!(
                    "{} workers still busy after {:?}; aborting them",
                    join_set.len(),
                    grace
                );
                join_set.abort_all();
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn busy_count(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn available_workers(&self) -> usize {
        self.worker_count.saturating_sub(self.busy_count())
    }
}

async fn worker_loop(
    index: usize,
    ctx: WorkerContext,
    token: CancellationToken,
    busy: Arc<AtomicUsize>,
) {
    tracing::debug!("Worker {} started", index);
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = ctx.queue.dequeue(ctx.poll_interval) => next,
        };
        let Some(job) = next else {
            continue;
        };

        busy.fetch_add(1, Ordering::SeqCst);
        run_job(&ctx, job, &token, index).await;
        busy.fetch_sub(1, Ordering::SeqCst);
    }
    tracing::debug!("Worker {} stopped", index);
}

/// Execute one dequeued job. The job's queue slot is released on return.
async fn run_job(ctx: &WorkerContext, job: QueuedJob, pool_token: &CancellationToken, worker: usize) {
    let submission = &job.submission;
    let job_id = &submission.id;

    match ctx.store.get(job_id) {
        Some(record) if record.status == JobStatus::Queued => {}
        Some(record) => {
            tracing::debug!("Skipping job {}: already {}", job_id, record.status);
            return;
        }
        None => {
            tracing::warn!("Skipping job {}: no status record", job_id);
            return;
        }
    }

    // Registered before the job turns running so a cancel that sees the
    // running status always finds the token.
    let job_token = pool_token.child_token();
    ctx.running.register(job_id.clone(), job_token.clone());

    let started = ctx
        .store
        .update(job_id, StatusUpdate::running(format!("Running on worker {worker}")));
    if started.is_applied() {
        tracing::info!(
            "Worker {} running job {} ({})",
            worker,
            job_id,
            submission.job_definition_uri
        );
        let update = execute(ctx, submission, &job_token).await;
        finish(ctx, job_id, update).await;
    } else {
        tracing::debug!("Job {} was cancelled before it started", job_id);
    }

    ctx.running.remove(job_id);
}

async fn execute(
    ctx: &WorkerContext,
    submission: &JobSubmission,
    token: &CancellationToken,
) -> StatusUpdate {
    let job_id = &submission.id;
    let report_type = submission.job_definition_uri.as_str();

    let Some(generator) = ctx.generators.get(report_type) else {
        tracing::warn!("No generator registered for report type {:?}", report_type);
        return StatusUpdate::failed(format!(
            "No generator registered for report type {report_type:?}"
        ));
    };

    let staging = match ctx.files.create_staging_dir(job_id).await {
        Ok(dir) => dir,
        Err(e) => {
            tracing::error!("Cannot prepare output directory for job {}: {}", job_id, e);
            return StatusUpdate::failed(format!("Storage error: {e}"));
        }
    };

    let request = GenerateRequest {
        job_id: job_id.clone(),
        arguments: submission.arguments.clone(),
        output_dir: staging.path().to_path_buf(),
        cancel: token.clone(),
        progress: ProgressReporter::new(job_id.clone(), Arc::clone(&ctx.store)),
    };

    match supervise(generator.generate(request), ctx.job_timeout, token).await {
        ExecutionOutcome::Finished(paths) => persist_outputs(ctx, job_id, staging.path(), paths).await,
        ExecutionOutcome::Failed(e) => {
            tracing::warn!("Job {} failed: {}", job_id, e);
            StatusUpdate::failed(format!("Report generation failed: {e}"))
        }
        ExecutionOutcome::Panicked(detail) => {
            tracing::error!("Generator for job {} panicked: {}", job_id, detail);
            StatusUpdate::failed("Report generation aborted unexpectedly")
        }
        ExecutionOutcome::TimedOut(limit) => {
            tracing::warn!("Job {} timed out after {:?}", job_id, limit);
            StatusUpdate::failed(format!("Job timed out after {limit:?}"))
        }
        // A user cancel has already made the record terminal, so this only
        // lands when the pool is shutting down.
        ExecutionOutcome::Cancelled => StatusUpdate::cancelled(SHUTDOWN_MESSAGE),
    }
}

/// Copy the generator's files into the job directory.
///
/// Any rejected or unreadable file fails the whole job and discards what
/// was already stored.
async fn persist_outputs(
    ctx: &WorkerContext,
    job_id: &JobId,
    output_dir: &Path,
    paths: Vec<PathBuf>,
) -> StatusUpdate {
    let mut stored = Vec::with_capacity(paths.len());

    for path in paths {
        let path = if path.is_relative() {
            output_dir.join(path)
        } else {
            path
        };
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            discard_files(ctx, job_id).await;
            return StatusUpdate::failed(format!(
                "Generator returned an unusable path: {}",
                path.display()
            ));
        };

        match ctx.files.store_path(job_id, name, &path).await {
            Ok(stored_path) => {
                let stored_name = stored_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| name.to_string());
                stored.push(stored_name);
            }
            Err(e) => {
                if e.is_validation() {
                    tracing::warn!("Rejected output {} of job {}: {}", name, job_id, e);
                } else {
                    tracing::error!("Failed to store output {} of job {}: {}", name, job_id, e);
                }
                discard_files(ctx, job_id).await;
                return StatusUpdate::failed(format!("Output file {name} rejected: {e}"));
            }
        }
    }

    StatusUpdate::completed(stored)
}

async fn finish(ctx: &WorkerContext, job_id: &JobId, update: StatusUpdate) {
    let status = update.status;
    match ctx.store.update(job_id, update) {
        UpdateOutcome::Applied => {
            if let Some(status) = status {
                tracing::info!("Job {} {}", job_id, status);
            }
        }
        outcome => {
            tracing::debug!("Result of job {} discarded: {:?}", job_id, outcome);
            // A cancel landed while outputs were being stored.
            if status == Some(JobStatus::Completed) {
                discard_files(ctx, job_id).await;
            }
        }
    }
}

async fn discard_files(ctx: &WorkerContext, job_id: &JobId) {
    if let Err(e) = ctx.files.delete_job_directory(job_id).await {
        tracing::warn!("Failed to remove files of job {}: {}", job_id, e);
    }
}
