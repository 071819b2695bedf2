//! Filesystem-backed file store.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use report_core::{FileMetadata, JobId};
use sysinfo::Disks;
use tempfile::TempDir;
use tokio::fs;
use tokio::sync::Mutex;

use crate::names::{content_type_for, extension_of, validate_filename, validate_job_id};
use crate::{FileStoreConfig, StorageError};

const STAGING_DIR: &str = ".staging";

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub retained: usize,
    pub failed: usize,
}

/// Per-job directory store.
///
/// All mutations (writes, deletions, sweeps) serialize on a single
/// store-level lock. Reads do not take the lock.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    config: FileStoreConfig,
    lock: Mutex<()>,
}

impl FileStore {
    /// Create the root directory if needed and wipe leftover staging data.
    pub async fn open(config: FileStoreConfig) -> Result<Self, StorageError> {
        config.validate()?;
        fs::create_dir_all(&config.root).await?;
        let root = fs::canonicalize(&config.root).await?;

        let staging = root.join(STAGING_DIR);
        if fs::try_exists(&staging).await? {
            fs::remove_dir_all(&staging).await?;
            tracing::debug!("Cleared stale staging area {:?}", staging);
        }
        fs::create_dir_all(&staging).await?;

        tracing::info!(
            "File store ready at {:?} (retention {}s, max file {} bytes)",
            root,
            config.retention.as_secs(),
            config.max_file_size
        );

        Ok(Self {
            root,
            config,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_dir(&self, job_id: &JobId) -> Result<PathBuf, StorageError> {
        validate_job_id(job_id)?;
        Ok(self.root.join(job_id.as_str()))
    }

    /// Create the job directory if it does not exist yet.
    pub async fn create_job_directory(&self, job_id: &JobId) -> Result<PathBuf, StorageError> {
        let dir = self.job_dir(job_id)?;
        let _guard = self.lock.lock().await;
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// A fresh staging directory for a job's raw generator output.
    ///
    /// Removed when the returned handle is dropped.
    pub async fn create_staging_dir(&self, job_id: &JobId) -> Result<TempDir, StorageError> {
        validate_job_id(job_id)?;
        let prefix = format!("{job_id}-");
        let staging = self.root.join(STAGING_DIR);
        let dir = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new().prefix(&prefix).tempdir_in(staging)
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(dir)
    }

    /// Validate and persist one file, returning its final path.
    ///
    /// Files are never overwritten: a name that already exists in the job
    /// directory gets a numeric suffix.
    pub async fn store_file(
        &self,
        job_id: &JobId,
        filename: &str,
        content: Bytes,
    ) -> Result<PathBuf, StorageError> {
        let dir = self.job_dir(job_id)?;
        let name = self.checked_name(filename)?;
        let size = content.len() as u64;
        self.check_size(size)?;

        let _guard = self.lock.lock().await;
        fs::create_dir_all(&dir).await?;

        let name = unique_name(&dir, &name).await?;
        let path = dir.join(&name);
        let tmp_path = dir.join(format!(".{name}.tmp"));

        if let Err(e) = fs::write(&tmp_path, &content).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        fs::rename(&tmp_path, &path).await?;

        tracing::debug!("Stored {} ({} bytes) for job {}", name, size, job_id);
        Ok(path)
    }

    /// Like [`store_file`](Self::store_file), but copies from `source`
    /// without loading it into memory.
    ///
    /// The size limit is checked against the source's metadata before
    /// copying and against the copied length afterwards.
    pub async fn store_path(
        &self,
        job_id: &JobId,
        filename: &str,
        source: &Path,
    ) -> Result<PathBuf, StorageError> {
        let dir = self.job_dir(job_id)?;
        let name = self.checked_name(filename)?;
        let meta = fs::metadata(source).await?;
        if !meta.is_file() {
            return Err(StorageError::InvalidFilename(filename.to_string()));
        }
        self.check_size(meta.len())?;

        let _guard = self.lock.lock().await;
        fs::create_dir_all(&dir).await?;

        let name = unique_name(&dir, &name).await?;
        let path = dir.join(&name);
        let tmp_path = dir.join(format!(".{name}.tmp"));

        let copied = match fs::copy(source, &tmp_path).await {
            Ok(copied) => copied,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(e.into());
            }
        };
        // The source may have grown since it was inspected.
        if let Err(e) = self.check_size(copied) {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e);
        }
        fs::rename(&tmp_path, &path).await?;

        tracing::debug!("Stored {} ({} bytes) for job {}", name, copied, job_id);
        Ok(path)
    }

    fn checked_name(&self, filename: &str) -> Result<String, StorageError> {
        let name = validate_filename(filename, self.config.max_filename_len)?;
        let extension = extension_of(&name).unwrap_or_default();
        if !self.config.allows_extension(&extension) {
            return Err(StorageError::UnsupportedType(extension));
        }
        Ok(name)
    }

    fn check_size(&self, size: u64) -> Result<(), StorageError> {
        if size > self.config.max_file_size {
            return Err(StorageError::FileTooLarge {
                size,
                max: self.config.max_file_size,
            });
        }
        Ok(())
    }

    /// Files of a job sorted by creation time. Empty when the job has no
    /// directory.
    pub async fn list_files(&self, job_id: &JobId) -> Result<Vec<FileMetadata>, StorageError> {
        let dir = self.job_dir(job_id)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = visible_name(&entry.file_name()) else {
                continue;
            };
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let created = meta.created().or_else(|_| meta.modified())?;
            files.push(FileMetadata {
                job_id: job_id.clone(),
                content_type: content_type_for(&name).to_string(),
                filename: name,
                size_bytes: meta.len(),
                created_at: DateTime::<Utc>::from(created),
            });
        }

        files.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(files)
    }

    /// Absolute path of an existing file inside the job directory.
    ///
    /// Returns `None` for anything that resolves outside the job directory
    /// (including through symlinks), the directory itself, hidden files and
    /// missing files.
    pub async fn resolve_path(&self, job_id: &JobId, filename: &str) -> Option<PathBuf> {
        if filename.is_empty() || filename.starts_with('.') {
            return None;
        }
        let dir = self.job_dir(job_id).ok()?;
        let dir = fs::canonicalize(&dir).await.ok()?;
        let candidate = fs::canonicalize(dir.join(filename)).await.ok()?;

        if candidate == dir || !candidate.starts_with(&dir) {
            tracing::warn!(
                "Rejected path outside job directory: job={} filename={:?}",
                job_id,
                filename
            );
            return None;
        }

        let meta = fs::metadata(&candidate).await.ok()?;
        meta.is_file().then_some(candidate)
    }

    /// Remove a job directory and everything in it. Succeeds when the
    /// directory is already gone.
    pub async fn delete_job_directory(&self, job_id: &JobId) -> Result<bool, StorageError> {
        let dir = self.job_dir(job_id)?;
        let _guard = self.lock.lock().await;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => tracing::info!("Deleted files of job {}", job_id),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(true)
    }

    /// Free space on the filesystem holding the root, if it can be determined.
    pub fn available_space_bytes(&self) -> Option<u64> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|disk| self.root.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }

    /// Number of stored files across all jobs.
    pub async fn total_file_count(&self) -> Result<usize, StorageError> {
        let mut total = 0;
        let mut jobs = fs::read_dir(&self.root).await?;
        while let Some(job) = jobs.next_entry().await? {
            if visible_name(&job.file_name()).is_none() || !job.file_type().await?.is_dir() {
                continue;
            }
            let mut files = match fs::read_dir(job.path()).await {
                Ok(files) => files,
                // Swept or cancelled concurrently.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(file) = files.next_entry().await? {
                if visible_name(&file.file_name()).is_some() && file.file_type().await?.is_file()
                {
                    total += 1;
                }
            }
        }
        Ok(total)
    }

    /// Remove job directories older than the configured retention.
    pub async fn sweep_expired(&self) -> Result<SweepReport, StorageError> {
        let cutoff = SystemTime::now()
            .checked_sub(self.config.retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        self.sweep_older_than(cutoff).await
    }

    /// Remove job directories last modified before `cutoff`.
    ///
    /// A directory that cannot be inspected or removed is logged and
    /// counted as failed; the sweep carries on with the rest.
    pub async fn sweep_older_than(&self, cutoff: SystemTime) -> Result<SweepReport, StorageError> {
        let _guard = self.lock.lock().await;
        let mut report = SweepReport::default();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if visible_name(&entry.file_name()).is_none() {
                continue;
            }
            let path = entry.path();
            let modified = match entry.metadata().await {
                Ok(meta) if !meta.is_dir() => continue,
                Ok(meta) => meta.modified(),
                Err(e) => Err(e),
            };
            let modified = match modified {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::warn!("Cannot read modification time of {:?}: {}", path, e);
                    report.failed += 1;
                    continue;
                }
            };

            if modified >= cutoff {
                report.retained += 1;
                continue;
            }

            match fs::remove_dir_all(&path).await {
                Ok(()) => {
                    tracing::debug!("Removed expired job directory {:?}", path);
                    report.removed += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to remove expired job directory {:?}: {}", path, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

fn visible_name(name: &std::ffi::OsStr) -> Option<String> {
    let name = name.to_str()?;
    (!name.starts_with('.')).then(|| name.to_string())
}

async fn unique_name(dir: &Path, name: &str) -> Result<String, StorageError> {
    if !fs::try_exists(dir.join(name)).await? {
        return Ok(name.to_string());
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    let mut n = 1u32;
    loop {
        let candidate = match ext {
            Some(ext) => format!("{stem}-{n}.{ext}"),
            None => format!("{stem}-{n}"),
        };
        if !fs::try_exists(dir.join(&candidate)).await? {
            return Ok(candidate);
        }
        n += 1;
    }
}
