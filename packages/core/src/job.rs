//! Job domain types: submissions, lifecycle status and status records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Opaque argument mapping handed to the report generator untouched.
pub type Arguments = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for a job.
///
/// Callers may supply their own identifier; otherwise a ULID string is
/// generated so identifiers still sort chronologically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request to run one report. Immutable once admitted into the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSubmission {
    /// Unique identifier for this job.
    #[serde(default)]
    pub id: JobId,
    /// Human-readable job name.
    pub name: String,
    /// Report type key, used to look up the generator.
    pub job_definition_uri: String,
    /// Arguments passed verbatim to the generator.
    #[serde(default)]
    pub arguments: Arguments,
    /// Accepted and stored, but never used to reorder the queue.
    #[serde(default)]
    pub priority: i32,
    /// When the submission was received.
    #[serde(default = "Utc::now")]
    pub submitted_at: DateTime<Utc>,
}

impl JobSubmission {
    /// Create a submission with a generated ID.
    pub fn new(
        name: impl Into<String>,
        job_definition_uri: impl Into<String>,
        arguments: Arguments,
    ) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            job_definition_uri: job_definition_uri.into(),
            arguments,
            priority: 0,
            submitted_at: Utc::now(),
        }
    }

    /// Use a caller-assigned ID.
    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the priority for this job.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Current status of a job in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the queue.
    #[default]
    Queued,
    /// Being executed by a worker.
    Running,
    /// Finished and produced its output files.
    Completed,
    /// Generator error or timeout.
    Failed,
    /// Cancelled by a caller or by shutdown.
    Cancelled,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Check if the job is queued or running.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Re-asserting a non-terminal status is allowed so progress updates can
    /// carry the current status along.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Queued)
                | (Running, Running)
                | (Queued, Running | Failed | Cancelled)
                | (Running, Completed | Failed | Cancelled)
        )
    }

    /// Get a simple status string for display.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable status record of a job, owned by the status store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub name: String,
    pub report_type: String,
    pub status: JobStatus,
    /// Percent complete, 0 to 100.
    pub progress: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set exactly when the status is terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_files: Option<Vec<String>>,
    pub last_updated: DateTime<Utc>,
}

impl JobRecord {
    /// Create a queued record for a freshly admitted submission.
    pub fn queued(submission: &JobSubmission) -> Self {
        let now = Utc::now();
        Self {
            id: submission.id.clone(),
            name: submission.name.clone(),
            report_type: submission.job_definition_uri.clone(),
            status: JobStatus::Queued,
            progress: 0,
            message: "Job queued".to_string(),
            created_at: now,
            started_at: None,
            completed_at: None,
            output_files: None,
            last_updated: now,
        }
    }

    /// Merge a partial update into this record.
    ///
    /// Terminal records are never modified. Timestamps follow the status:
    /// entering `running` stamps `started_at` and resets progress, entering
    /// a terminal status stamps `completed_at`. Progress never moves
    /// backwards within an execution.
    pub fn apply(&mut self, update: StatusUpdate, now: DateTime<Utc>) -> UpdateOutcome {
        if self.status.is_terminal() {
            return UpdateOutcome::AlreadyTerminal(self.status);
        }

        if let Some(next) = update.status {
            if !self.status.can_transition_to(next) {
                return UpdateOutcome::InvalidTransition {
                    from: self.status,
                    to: next,
                };
            }
            if next == JobStatus::Running && self.status != JobStatus::Running {
                self.started_at = Some(now);
                self.progress = 0;
            }
            if next.is_terminal() {
                self.completed_at = Some(now);
            }
            self.status = next;
        }

        if let Some(progress) = update.progress {
            self.progress = self.progress.max(progress.min(100));
        }
        if let Some(message) = update.message {
            self.message = message;
        }
        if let Some(files) = update.output_files {
            self.output_files = Some(files);
        }
        self.last_updated = now;

        UpdateOutcome::Applied
    }
}

/// Partial update merged into a [`JobRecord`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub output_files: Option<Vec<String>>,
}

impl StatusUpdate {
    /// Mark the job as picked up by a worker.
    pub fn running(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Running),
            progress: Some(0),
            message: Some(message.into()),
            output_files: None,
        }
    }

    /// Mark the job as finished with the given output files.
    pub fn completed(output_files: Vec<String>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            message: Some(format!("Report generated ({} files)", output_files.len())),
            output_files: Some(output_files),
        }
    }

    /// Mark the job as failed.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Mark the job as cancelled.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Cancelled),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Report progress without changing the status.
    pub fn progress(percent: u8, message: impl Into<String>) -> Self {
        Self {
            progress: Some(percent),
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Result of merging a [`StatusUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// No record with that ID (never created or already evicted).
    Missing,
    /// The record is terminal and was left untouched.
    AlreadyTerminal(JobStatus),
    /// The requested status change is not allowed by the lifecycle.
    InvalidTransition { from: JobStatus, to: JobStatus },
}

impl UpdateOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, UpdateOutcome::Applied)
    }
}

/// Receipt for an admitted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    pub job_id: JobId,
    /// 1-based position at admission time. An estimate: workers dequeue
    /// concurrently.
    pub queue_position: usize,
}
