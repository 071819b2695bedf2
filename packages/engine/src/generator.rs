//! Report generator trait and registry.
//!
//! A generator is the collaborator that actually produces report files. It
//! receives the job's arguments and a private output directory, and returns
//! the paths of the files it wrote. The engine decides which of those files
//! are kept.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use report_core::{Arguments, JobId, StatusUpdate};
use tokio_util::sync::CancellationToken;

use crate::status_store::StatusStore;

/// Result type for generators.
pub type GenerateResult = Result<Vec<PathBuf>, GenerateError>;

/// Future type for async generators.
pub type GenerateFuture = BoxFuture<'static, GenerateResult>;

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a generator needs for one run.
#[derive(Debug)]
pub struct GenerateRequest {
    pub job_id: JobId,
    pub arguments: Arguments,
    /// Private scratch directory for this run. Relative paths returned by
    /// the generator are resolved against it.
    pub output_dir: PathBuf,
    /// Cancelled on user cancellation, timeout and shutdown. Cooperative:
    /// the engine stops waiting either way.
    pub cancel: CancellationToken,
    pub progress: ProgressReporter,
}

/// Lets a running generator publish progress on its job record.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    store: Arc<StatusStore>,
}

impl ProgressReporter {
    pub fn new(job_id: JobId, store: Arc<StatusStore>) -> Self {
        Self { job_id, store }
    }

    /// Record progress (clamped to 100, never decreasing).
    ///
    /// Returns `false` once the job has reached a terminal status, which a
    /// generator may treat as a signal to stop.
    pub fn report(&self, percent: u8, message: impl Into<String>) -> bool {
        self.store
            .update(&self.job_id, StatusUpdate::progress(percent, message))
            .is_applied()
    }
}

/// Trait for report generators.
pub trait ReportGenerator: Send + Sync + 'static {
    /// The report type (job definition URI) this generator handles.
    fn report_type(&self) -> &str;

    fn generate(&self, request: GenerateRequest) -> GenerateFuture;
}

/// Maps report types to their generators.
#[derive(Default)]
pub struct GeneratorRegistry {
    generators: HashMap<String, Arc<dyn ReportGenerator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a generator, replacing any previous one for the same type.
    pub fn register<G: ReportGenerator>(&mut self, generator: G) {
        let report_type = generator.report_type().to_string();
        if self
            .generators
            .insert(report_type.clone(), Arc::new(generator))
            .is_some()
        {
            tracing::warn!("Replaced generator for report type {}", report_type);
        }
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<G: ReportGenerator>(mut self, generator: G) -> Self {
        self.register(generator);
        self
    }

    pub fn get(&self, report_type: &str) -> Option<Arc<dyn ReportGenerator>> {
        self.generators.get(report_type).cloned()
    }

    pub fn has_generator(&self, report_type: &str) -> bool {
        self.generators.contains_key(report_type)
    }

    pub fn report_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.generators.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }
}

/// A closure-backed generator.
pub struct FnGenerator<F>
where
    F: Fn(GenerateRequest) -> GenerateFuture + Send + Sync + 'static,
{
    report_type: String,
    generate: F,
}

impl<F> FnGenerator<F>
where
    F: Fn(GenerateRequest) -> GenerateFuture + Send + Sync + 'static,
{
    pub fn new(report_type: impl Into<String>, generate: F) -> Self {
        Self {
            report_type: report_type.into(),
            generate,
        }
    }
}

impl<F> ReportGenerator for FnGenerator<F>
where
    F: Fn(GenerateRequest) -> GenerateFuture + Send + Sync + 'static,
{
    fn report_type(&self) -> &str {
        &self.report_type
    }

    fn generate(&self, request: GenerateRequest) -> GenerateFuture {
        (self.generate)(request)
    }
}

/// Wrap a synchronous generator so it runs on the blocking thread pool.
///
/// A blocking generator that overruns its deadline is abandoned, not
/// stopped; it should poll `request.cancel` if it can run for long.
pub fn blocking_generator<G>(report_type: impl Into<String>, generate: G) -> impl ReportGenerator
where
    G: Fn(GenerateRequest) -> GenerateResult + Send + Sync + 'static,
{
    let generate = Arc::new(generate);
    FnGenerator::new(report_type, move |request: GenerateRequest| -> GenerateFuture {
        let generate = Arc::clone(&generate);
        Box::pin(async move {
            match tokio::task::spawn_blocking(move || generate(request)).await {
                Ok(result) => result,
                Err(e) => Err(GenerateError::Failed(format!("generator task failed: {e}"))),
            }
        })
    })
}
