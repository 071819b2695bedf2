//! Filename and job-id rules for on-disk storage.

use std::path::Path;

use report_core::JobId;

use crate::StorageError;

/// Name used when sanitization leaves nothing behind.
pub const DEFAULT_FILENAME: &str = "report";

const MAX_JOB_ID_LEN: usize = 128;

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')
}

/// Strip every character outside `[A-Za-z0-9._-]`, drop leading dots and
/// truncate to `max_len`, keeping the extension when possible.
///
/// Returns [`DEFAULT_FILENAME`] when nothing usable is left.
pub fn sanitize_filename(raw: &str, max_len: usize) -> String {
    sanitize(raw, max_len).unwrap_or_else(|| DEFAULT_FILENAME.to_string())
}

fn sanitize(raw: &str, max_len: usize) -> Option<String> {
    let cleaned: String = raw.chars().filter(|c| is_allowed_char(*c)).collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        return None;
    }
    Some(truncate(cleaned, max_len))
}

// Names are ASCII at this point, so byte slicing is safe.
fn truncate(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.len() + 1 < max_len => {
            let keep = max_len - ext.len() - 1;
            format!("{}.{}", &stem[..keep.min(stem.len())], ext)
        }
        _ => name[..max_len].to_string(),
    }
}

/// Validate a caller-supplied filename for a write.
///
/// Traversal sequences and path separators are rejected outright; anything
/// else is sanitized, and a name that sanitizes to nothing is rejected.
pub fn validate_filename(raw: &str, max_len: usize) -> Result<String, StorageError> {
    if raw.contains("..") || raw.contains('/') || raw.contains('\\') || raw.contains('\0') {
        return Err(StorageError::InvalidFilename(raw.to_string()));
    }
    sanitize(raw, max_len).ok_or_else(|| StorageError::InvalidFilename(raw.to_string()))
}

/// Job IDs become directory names, so they follow the same character rules
/// and may not be hidden or relative entries.
pub fn validate_job_id(job_id: &JobId) -> Result<(), StorageError> {
    let id = job_id.as_str();
    let valid = !id.is_empty()
        && id.len() <= MAX_JOB_ID_LEN
        && !id.starts_with('.')
        && id.chars().all(is_allowed_char);
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidJobId(id.to_string()))
    }
}

/// Lowercase extension without the dot.
pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
}

/// MIME type for a stored report file.
pub fn content_type_for(filename: &str) -> &'static str {
    match extension_of(filename).as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("pdf") => "application/pdf",
        Some("csv") => "text/csv",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}
