//! File store configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::StorageError;

const MB: u64 = 1024 * 1024;
const DAY_SECS: u64 = 24 * 60 * 60;

/// Extensions accepted by default.
pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 5] = ["html", "pdf", "csv", "xlsx", "json"];

#[derive(Debug, Clone)]
pub struct FileStoreConfig {
    /// Directory holding one subdirectory per job.
    pub root: PathBuf,
    /// Largest accepted file, in bytes.
    pub max_file_size: u64,
    /// Lowercase extensions without the leading dot.
    pub allowed_extensions: Vec<String>,
    /// Job directories older than this are removed by the sweeper.
    pub retention: Duration,
    pub sweep_interval: Duration,
    pub max_filename_len: usize,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/reports"),
            max_file_size: 100 * MB,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            retention: Duration::from_secs(7 * DAY_SECS),
            sweep_interval: Duration::from_secs(60 * 60),
            max_filename_len: 255,
        }
    }
}

impl FileStoreConfig {
    /// Default configuration rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_extensions = normalize_extensions(extensions);
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `REPORT_STORAGE_ROOT` (default: `./data/reports`)
    /// - `REPORT_MAX_FILE_MB` (default: 100)
    /// - `REPORT_ALLOWED_EXTENSIONS` comma separated (default: `html,pdf,csv,xlsx,json`)
    /// - `REPORT_FILE_RETENTION_DAYS` (default: 7)
    /// - `REPORT_FILE_SWEEP_INTERVAL_SECS` (default: 3600)
    /// - `REPORT_MAX_FILENAME_LEN` (default: 255)
    pub fn from_env() -> Result<Self, StorageError> {
        let mut cfg = Self::default();

        if let Some(root) = std::env::var("REPORT_STORAGE_ROOT").ok().and_then(non_empty) {
            cfg.root = PathBuf::from(root);
        }
        if let Some(mb) = parse_env::<u64>("REPORT_MAX_FILE_MB")? {
            cfg.max_file_size = scaled("REPORT_MAX_FILE_MB", mb, MB)?;
        }
        if let Some(list) = std::env::var("REPORT_ALLOWED_EXTENSIONS")
            .ok()
            .and_then(non_empty)
        {
            cfg.allowed_extensions = normalize_extensions(list.split(','));
        }
        if let Some(days) = parse_env::<u64>("REPORT_FILE_RETENTION_DAYS")? {
            cfg.retention = Duration::from_secs(scaled("REPORT_FILE_RETENTION_DAYS", days, DAY_SECS)?);
        }
        if let Some(secs) = parse_env::<u64>("REPORT_FILE_SWEEP_INTERVAL_SECS")? {
            cfg.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(len) = parse_env::<usize>("REPORT_MAX_FILENAME_LEN")? {
            cfg.max_filename_len = len;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the store cannot work with.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.allowed_extensions.is_empty() {
            return Err(StorageError::InvalidConfig(
                "at least one file extension must be allowed".into(),
            ));
        }
        if self.max_filename_len < 8 {
            return Err(StorageError::InvalidConfig(format!(
                "max filename length {} is too short",
                self.max_filename_len
            )));
        }
        if self.sweep_interval.is_zero() {
            return Err(StorageError::InvalidConfig(
                "file sweep interval must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Whether `extension` (any case) is on the allow-list.
    pub fn allows_extension(&self, extension: &str) -> bool {
        let extension = extension.to_ascii_lowercase();
        self.allowed_extensions.iter().any(|allowed| *allowed == extension)
    }
}

fn scaled(var_name: &str, value: u64, unit: u64) -> Result<u64, StorageError> {
    value
        .checked_mul(unit)
        .ok_or_else(|| StorageError::InvalidConfig(format!("{var_name}={value} is too large")))
}

fn normalize_extensions<I, S>(extensions: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    extensions
        .into_iter()
        .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_env<T: FromStr>(var_name: &str) -> Result<Option<T>, StorageError> {
    let Some(raw) = std::env::var(var_name).ok().and_then(non_empty) else {
        return Ok(None);
    };
    raw.parse::<T>().map(Some).map_err(|_| {
        StorageError::InvalidConfig(format!("invalid value for {var_name}={raw}"))
    })
}
