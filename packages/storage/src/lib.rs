//! Per-job artifact storage for generated reports.
//!
//! Goal:
//! - One directory per job under a configured root
//! - Validated writes (filename rules, size limit, extension allow-list)
//! - Path resolution that never escapes the job directory
//! - Retention sweeping of old job directories
//!
//! Collaborators write their raw output into a staging directory
//! (`<root>/.staging`); only files that pass validation are copied into the
//! job directory. Hidden entries are ignored by listing, counting and
//! sweeping.

mod config;
mod names;
mod store;

pub use config::{DEFAULT_ALLOWED_EXTENSIONS, FileStoreConfig};
pub use names::{
    DEFAULT_FILENAME, content_type_for, extension_of, sanitize_filename, validate_filename,
    validate_job_id,
};
pub use store::{FileStore, SweepReport};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error("invalid job id: {0:?}")]
    InvalidJobId(String),

    #[error("file too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("unsupported file type: {0:?}")]
    UnsupportedType(String),

    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// True for rejections caused by the caller's input rather than the disk.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidFilename(_)
                | StorageError::InvalidJobId(_)
                | StorageError::FileTooLarge { .. }
                | StorageError::UnsupportedType(_)
        )
    }
}
