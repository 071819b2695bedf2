//! Service configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use storage::FileStoreConfig;

use crate::EngineError;

const MB: u64 = 1024 * 1024;
const HOUR_SECS: u64 = 60 * 60;
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Settings for a [`ReportService`](crate::ReportService).
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Number of concurrent workers.
    pub worker_count: usize,
    /// Maximum number of queued plus executing jobs.
    pub queue_capacity: usize,
    /// Wall-clock limit for one generator run.
    pub job_timeout: Duration,
    /// How long an idle worker waits on the queue before re-checking for
    /// shutdown.
    pub poll_interval: Duration,
    /// Terminal status records older than this are evicted.
    pub status_retention: Duration,
    pub status_sweep_interval: Duration,
    /// How long shutdown waits for in-flight jobs to wind down.
    pub shutdown_grace: Duration,
    /// Below this much free disk the service reports itself degraded.
    pub min_free_disk_bytes: u64,
    pub storage: FileStoreConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 100,
            job_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
            status_retention: Duration::from_secs(24 * HOUR_SECS),
            status_sweep_interval: Duration::from_secs(HOUR_SECS),
            shutdown_grace: Duration::from_secs(30),
            min_free_disk_bytes: 500 * MB,
            storage: FileStoreConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Default configuration storing files under `storage_root`.
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage: FileStoreConfig::new(storage_root),
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_status_retention(mut self, retention: Duration) -> Self {
        self.status_retention = retention;
        self
    }

    pub fn with_status_sweep_interval(mut self, interval: Duration) -> Self {
        self.status_sweep_interval = interval;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_min_free_disk_bytes(mut self, bytes: u64) -> Self {
        self.min_free_disk_bytes = bytes;
        self
    }

    pub fn with_storage(mut self, storage: FileStoreConfig) -> Self {
        self.storage = storage;
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `REPORT_WORKERS` (default: 4)
    /// - `REPORT_QUEUE_CAPACITY` (default: 100)
    /// - `REPORT_JOB_TIMEOUT_SECS` (default: 300)
    /// - `REPORT_POLL_INTERVAL_MS` (default: 1000)
    /// - `REPORT_STATUS_RETENTION_HOURS` (default: 24)
    /// - `REPORT_STATUS_SWEEP_INTERVAL_SECS` (default: 3600)
    /// - `REPORT_SHUTDOWN_GRACE_SECS` (default: 30)
    /// - `REPORT_MIN_FREE_DISK_MB` (default: 500)
    ///
    /// File store settings come from [`FileStoreConfig::from_env`].
    pub fn from_env() -> Result<Self, EngineError> {
        let mut cfg = Self {
            storage: FileStoreConfig::from_env()?,
            ..Self::default()
        };

        if let Some(workers) = parse_env::<usize>("REPORT_WORKERS")? {
            cfg.worker_count = workers;
        }
        if let Some(capacity) = parse_env::<usize>("REPORT_QUEUE_CAPACITY")? {
            cfg.queue_capacity = capacity;
        }
        if let Some(secs) = parse_env::<u64>("REPORT_JOB_TIMEOUT_SECS")? {
            cfg.job_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_env::<u64>("REPORT_POLL_INTERVAL_MS")? {
            cfg.poll_interval = Duration::from_millis(ms);
        }
        if let Some(hours) = parse_env::<u64>("REPORT_STATUS_RETENTION_HOURS")? {
            cfg.status_retention =
                Duration::from_secs(scaled("REPORT_STATUS_RETENTION_HOURS", hours, HOUR_SECS)?);
        }
        if let Some(secs) = parse_env::<u64>("REPORT_STATUS_SWEEP_INTERVAL_SECS")? {
            cfg.status_sweep_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>("REPORT_SHUTDOWN_GRACE_SECS")? {
            cfg.shutdown_grace = Duration::from_secs(secs);
        }
        if let Some(mb) = parse_env::<u64>("REPORT_MIN_FREE_DISK_MB")? {
            cfg.min_free_disk_bytes = scaled("REPORT_MIN_FREE_DISK_MB", mb, MB)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.worker_count == 0 {
            return Err(EngineError::InvalidConfig("worker count must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(EngineError::InvalidConfig("queue capacity must be positive".into()));
        }
        for (name, value) in [
            ("job timeout", self.job_timeout),
            ("poll interval", self.poll_interval),
            ("status sweep interval", self.status_sweep_interval),
        ] {
            if value.is_zero() {
                return Err(EngineError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        if self.poll_interval > MAX_POLL_INTERVAL {
            return Err(EngineError::InvalidConfig(format!(
                "poll interval {:?} exceeds {:?}",
                self.poll_interval, MAX_POLL_INTERVAL
            )));
        }
        self.storage.validate()?;
        Ok(())
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_env<T: FromStr>(var_name: &str) -> Result<Option<T>, EngineError> {
    let Some(raw) = std::env::var(var_name).ok().and_then(non_empty) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| EngineError::InvalidConfig(format!("invalid value for {var_name}={raw}")))
}

fn scaled(var_name: &str, value: u64, unit: u64) -> Result<u64, EngineError> {
    value
        .checked_mul(unit)
        .ok_or_else(|| EngineError::InvalidConfig(format!("{var_name}={value} is too large")))
}
