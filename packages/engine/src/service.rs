//! Public facade over the queue, workers, status store and file store.

use std::path::PathBuf;
use std::sync::Arc;

use report_core::{
    Admission, FileMetadata, HealthReport, HealthState, JobId, JobRecord, JobStatus,
    JobSubmission, StatusUpdate, UpdateOutcome,
};
use storage::{FileStore, validate_job_id};

use crate::config::ServiceConfig;
use crate::generator::GeneratorRegistry;
use crate::queue::JobQueue;
use crate::status_store::StatusStore;
use crate::supervisor::RunningJobs;
use crate::sweeper::{FileRetention, StatusRetention, Sweeper};
use crate::worker::{SHUTDOWN_MESSAGE, WorkerContext, WorkerPool};
use crate::EngineError;

/// A running report service.
///
/// Cheap to share behind an `Arc`; every operation takes `&self`.
pub struct ReportService {
    config: ServiceConfig,
    queue: JobQueue,
    store: Arc<StatusStore>,
    files: Arc<FileStore>,
    running: Arc<RunningJobs>,
    pool: WorkerPool,
    status_sweeper: Sweeper,
    file_sweeper: Sweeper,
}

impl ReportService {
    /// Open the file store, start the workers and both sweepers.
    pub async fn start(
        config: ServiceConfig,
        generators: GeneratorRegistry,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        for report_type in generators.report_types() {
            tracing::debug!("Generator registered for report type {}", report_type);
        }

        let files = Arc::new(FileStore::open(config.storage.clone()).await?);
        let store = Arc::new(StatusStore::new());
        let queue = JobQueue::new(config.queue_capacity);
        let running = Arc::new(RunningJobs::default());

        let status_sweeper = Sweeper::spawn(
            Arc::new(StatusRetention::new(Arc::clone(&store), config.status_retention)),
            config.status_sweep_interval,
        )
        .await?;
        let file_sweeper = match Sweeper::spawn(
            Arc::new(FileRetention::new(Arc::clone(&files))),
            config.storage.sweep_interval,
        )
        .await
        {
            Ok(sweeper) => sweeper,
            Err(e) => {
                status_sweeper.stop().await;
                return Err(e);
            }
        };

        let pool = WorkerPool::new(config.worker_count);
        pool.start(WorkerContext {
            queue: queue.clone(),
            store: Arc::clone(&store),
            files: Arc::clone(&files),
            generators: Arc::new(generators),
            running: Arc::clone(&running),
            job_timeout: config.job_timeout,
            poll_interval: config.poll_interval,
        });

        tracing::info!(
            "Report service started: {} workers, queue capacity {}, job timeout {:?}",
            config.worker_count,
            config.queue_capacity,
            config.job_timeout
        );

        Ok(Self {
            config,
            queue,
            store,
            files,
            running,
            pool,
            status_sweeper,
            file_sweeper,
        })
    }

    /// Admit a job without blocking.
    ///
    /// On success the job is queued and its record is visible through
    /// [`status`](Self::status). A full or closed queue leaves no trace of
    /// the job.
    pub fn submit(&self, submission: JobSubmission) -> Result<Admission, EngineError> {
        if self.queue.is_closed() {
            return Err(EngineError::ShuttingDown);
        }
        validate_job_id(&submission.id)?;

        let job_id = submission.id.clone();
        self.store.create(&submission)?;

        match self.queue.try_enqueue(submission) {
            Ok(queue_position) => {
                tracing::info!("Job {} queued at position {}", job_id, queue_position);
                Ok(Admission {
                    job_id,
                    queue_position,
                })
            }
            Err(e) => {
                self.store.remove(&job_id);
                tracing::warn!("Rejected job {}: {}", job_id, e);
                Err(e)
            }
        }
    }

    /// Snapshot of a job's status record.
    pub fn status(&self, job_id: &JobId) -> Result<JobRecord, EngineError> {
        self.store
            .get(job_id)
            .ok_or_else(|| EngineError::JobNotFound(job_id.clone()))
    }

    /// Current 1-based position of a queued job, if it is still pending.
    pub fn queue_position(&self, job_id: &JobId) -> Option<usize> {
        self.queue.approximate_position(job_id)
    }

    /// Cancel a queued or running job and delete its files.
    ///
    /// Returns `false` for unknown jobs and jobs that already finished.
    pub async fn cancel(&self, job_id: &JobId) -> bool {
        match self
            .store
            .update(job_id, StatusUpdate::cancelled("Cancelled by user"))
        {
            UpdateOutcome::Applied => {}
            outcome => {
                tracing::debug!("Cancel of job {} ignored: {:?}", job_id, outcome);
                return false;
            }
        }

        let was_running = self.running.cancel(job_id);
        tracing::info!(
            "Cancelled job {} ({})",
            job_id,
            if was_running { "running" } else { "queued" }
        );

        if let Err(e) = self.files.delete_job_directory(job_id).await {
            tracing::warn!("Failed to delete files of cancelled job {}: {}", job_id, e);
        }
        true
    }

    /// Files of a completed job, oldest first.
    pub async fn list_files(&self, job_id: &JobId) -> Result<Vec<FileMetadata>, EngineError> {
        let record = self.status(job_id)?;
        if record.status != JobStatus::Completed {
            return Err(EngineError::JobNotCompleted {
                job_id: job_id.clone(),
                status: record.status,
            });
        }
        Ok(self.files.list_files(job_id).await?)
    }

    /// Absolute path of a stored file, guaranteed to lie inside the job's
    /// directory.
    ///
    /// Files outlive status records, so this does not consult the status
    /// store.
    pub async fn file_download_path(
        &self,
        job_id: &JobId,
        filename: &str,
    ) -> Result<PathBuf, EngineError> {
        self.files
            .resolve_path(job_id, filename)
            .await
            .ok_or_else(|| EngineError::FileNotFound {
                job_id: job_id.clone(),
                filename: filename.to_string(),
            })
    }

    pub async fn health(&self) -> HealthReport {
        let files = Arc::clone(&self.files);
        let available_disk_bytes = tokio::task::spawn_blocking(move || files.available_space_bytes())
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Disk space check failed: {}", e);
                None
            });

        let total_files = match self.files.total_file_count().await {
            Ok(total) => total,
            Err(e) => {
                tracing::warn!("Failed to count stored files: {}", e);
                0
            }
        };

        let state = match available_disk_bytes {
            Some(bytes) if bytes >= self.config.min_free_disk_bytes => HealthState::Healthy,
            _ => HealthState::Degraded,
        };

        HealthReport {
            state,
            queue_size: self.queue.size(),
            active_jobs: self.running.len(),
            available_workers: self.pool.available_workers(),
            available_disk_bytes,
            total_files,
        }
    }

    /// Evict expired status records now.
    pub async fn sweep_status_now(&self) -> Result<usize, EngineError> {
        self.status_sweeper.sweep_now().await
    }

    /// Delete expired job directories now.
    pub async fn sweep_files_now(&self) -> Result<usize, EngineError> {
        self.file_sweeper.sweep_now().await
    }

    /// Stop accepting jobs, cancel pending and running ones and stop the
    /// sweepers.
    ///
    /// Running generators get up to the configured grace period to wind
    /// down. Safe to call more than once.
    pub async fn shutdown(&self) {
        if !self.pool.is_running() {
            return;
        }
        tracing::info!("Shutting down report service");
        self.queue.close();

        if !self.pool.stop(self.config.shutdown_grace).await {
            tracing::warn!("Some jobs were abandoned during shutdown");
        }
        // Aborted workers never record an outcome for their jobs.
        for job_id in self.running.ids() {
            self.store
                .update(&job_id, StatusUpdate::cancelled(SHUTDOWN_MESSAGE));
            self.running.remove(&job_id);
        }

        // Workers are gone; whatever is still pending will never run.
        let pending = self.queue.close_and_drain();
        for submission in &pending {
            self.store
                .update(&submission.id, StatusUpdate::cancelled(SHUTDOWN_MESSAGE));
        }
        if !pending.is_empty() {
            tracing::info!("Cancelled {} queued jobs", pending.len());
        }

        self.status_sweeper.stop().await;
        self.file_sweeper.stop().await;
        tracing::info!("Report service stopped");
    }
}
