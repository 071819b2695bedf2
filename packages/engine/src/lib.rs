//! Report job engine.
//!
//! Goal:
//! - Bounded FIFO admission with immediate rejection when full
//! - A fixed pool of workers running pluggable report generators
//! - Per-job deadlines and cooperative cancellation
//! - In-memory status records with time-based eviction
//! - Generated files persisted through the [`storage`] crate
//!
//! [`ReportService`] ties the pieces together. Generators are registered up
//! front in a [`GeneratorRegistry`], keyed by the submission's job
//! definition URI.

mod config;
mod error;
mod generator;
mod queue;
mod service;
mod status_store;
mod supervisor;
mod sweeper;
mod worker;

pub use config::ServiceConfig;
pub use error::EngineError;
pub use generator::{
    FnGenerator, GenerateError, GenerateFuture, GenerateRequest, GenerateResult,
    GeneratorRegistry, ProgressReporter, ReportGenerator, blocking_generator,
};
pub use queue::{JobQueue, QueuedJob};
pub use service::ReportService;
pub use status_store::StatusStore;
pub use supervisor::{ExecutionOutcome, RunningJobs, supervise};
pub use sweeper::{FileRetention, StatusRetention, SweepTask, Sweeper};
pub use worker::{SHUTDOWN_MESSAGE, WorkerContext, WorkerPool};
