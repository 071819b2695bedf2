//! Core domain types for the report job queue.
//!
//! This crate contains the types shared by every package:
//! - `JobSubmission`, `JobRecord` and `JobStatus` for the job lifecycle
//! - `StatusUpdate` for partial record merges
//! - `FileMetadata` for persisted report files
//! - `HealthReport` for service health

mod file;
mod health;
mod job;

pub use file::FileMetadata;
pub use health::{HealthReport, HealthState};
pub use job::{
    Admission, Arguments, JobId, JobRecord, JobStatus, JobSubmission, StatusUpdate, UpdateOutcome,
};
