#![allow(dead_code)]

use std::error::Error;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use engine::{
    FnGenerator, GenerateFuture, GenerateRequest, GeneratorRegistry, ReportGenerator,
    ReportService, ServiceConfig,
};
use report_core::{JobId, JobRecord, JobStatus, JobSubmission};
use serde_json::{Map, Value};
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::time::Instant;

const WAIT_LIMIT: Duration = Duration::from_secs(20);

/// A service rooted in a temporary directory that lives as long as it does.
pub struct TestService {
    pub service: ReportService,
    pub dir: TempDir,
}

impl Deref for TestService {
    type Target = ReportService;

    fn deref(&self) -> &ReportService {
        &self.service
    }
}

pub fn test_config(root: &Path) -> ServiceConfig {
    ServiceConfig::new(root.join("reports"))
        .with_workers(4)
        .with_queue_capacity(100)
        .with_job_timeout(Duration::from_secs(10))
        .with_poll_interval(Duration::from_millis(20))
        .with_shutdown_grace(Duration::from_secs(2))
        .with_min_free_disk_bytes(0)
}

pub async fn start_service(
    generators: GeneratorRegistry,
    configure: impl FnOnce(ServiceConfig) -> ServiceConfig,
) -> Result<TestService, Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let config = configure(test_config(dir.path()));
    let service = ReportService::start(config, generators).await?;
    Ok(TestService { service, dir })
}

pub fn submission(report_type: &str) -> JobSubmission {
    JobSubmission::new("Test report", report_type, Map::new())
}

pub fn submission_with(report_type: &str, key: &str, value: Value) -> JobSubmission {
    let mut arguments = Map::new();
    arguments.insert(key.to_string(), value);
    JobSubmission::new("Test report", report_type, arguments)
}

/// Poll a job until `done` holds for its record.
pub async fn wait_for(
    service: &ReportService,
    job_id: &JobId,
    mut done: impl FnMut(&JobRecord) -> bool,
) -> Result<JobRecord, String> {
    let deadline = Instant::now() + WAIT_LIMIT;
    loop {
        let timed_out = Instant::now() >= deadline;
        match service.status(job_id) {
            Ok(record) if done(&record) => return Ok(record),
            Ok(record) if timed_out => {
                return Err(format!(
                    "job {job_id} stuck at {}: {}",
                    record.status, record.message
                ));
            }
            Err(e) if timed_out => return Err(e.to_string()),
            _ => {}
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_status(
    service: &ReportService,
    job_id: &JobId,
    status: JobStatus,
) -> Result<JobRecord, String> {
    wait_for(service, job_id, |record| record.status == status).await
}

/// Blocks gated generators until opened.
#[derive(Clone)]
pub struct Gate {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Gate {
    pub fn closed() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|open| *open).await;
    }
}

async fn write_html(request: &GenerateRequest, name: &str) -> engine::GenerateResult {
    let title = request
        .arguments
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("Report");
    let path = request.output_dir.join(name);
    tokio::fs::write(&path, format!("<html><h1>{title}</h1></html>")).await?;
    Ok(vec![path])
}

/// Writes `report.html` immediately.
pub fn html_generator(report_type: &str) -> impl ReportGenerator {
    FnGenerator::new(report_type, |request: GenerateRequest| -> GenerateFuture {
        Box::pin(async move { write_html(&request, "report.html").await })
    })
}

/// Like [`html_generator`], but counts invocations.
pub fn counting_generator(report_type: &str, calls: Arc<AtomicUsize>) -> impl ReportGenerator {
    FnGenerator::new(report_type, move |request: GenerateRequest| -> GenerateFuture {
        calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { write_html(&request, "report.html").await })
    })
}

/// Waits for the gate before writing its output.
pub fn gated_generator(report_type: &str, gate: Gate) -> impl ReportGenerator {
    FnGenerator::new(report_type, move |request: GenerateRequest| -> GenerateFuture {
        let gate = gate.clone();
        Box::pin(async move {
            gate.wait().await;
            write_html(&request, "report.html").await
        })
    })
}
