//! Metadata for generated report files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobId;

/// A file persisted for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub job_id: JobId,
    /// Sanitized file name, relative to the job directory.
    pub filename: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    /// MIME type derived from the extension.
    pub content_type: String,
}
