//! JSON-lines command protocol.

use std::path::PathBuf;
use std::sync::Arc;

use engine::{EngineError, ReportService};
use report_core::{Admission, FileMetadata, HealthReport, JobId, JobRecord, JobSubmission};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Submit(JobSubmission),
    Status {
        #[serde(rename = "jobId")]
        job_id: JobId,
    },
    Cancel {
        #[serde(rename = "jobId")]
        job_id: JobId,
    },
    Files {
        #[serde(rename = "jobId")]
        job_id: JobId,
    },
    Download {
        #[serde(rename = "jobId")]
        job_id: JobId,
        filename: String,
    },
    Health,
    Sweep,
}

#[derive(Debug, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Admitted(Admission),
    Status(JobRecord),
    Cancelled { cancelled: bool },
    Files { files: Vec<FileMetadata> },
    Download { path: PathBuf },
    Health(HealthReport),
    Swept { records: usize, directories: usize },
    NotFound { message: String },
    Error { message: String },
}

impl Reply {
    fn error(e: impl std::fmt::Display) -> Self {
        Reply::Error {
            message: e.to_string(),
        }
    }

    fn failure(e: EngineError) -> Self {
        if e.is_not_found() {
            Reply::NotFound {
                message: e.to_string(),
            }
        } else {
            Reply::error(e)
        }
    }
}

pub async fn handle(service: &ReportService, command: Command) -> Reply {
    match command {
        Command::Submit(submission) => match service.submit(submission) {
            Ok(admission) => Reply::Admitted(admission),
            Err(e) => Reply::failure(e),
        },
        Command::Status { job_id } => match service.status(&job_id) {
            Ok(record) => Reply::Status(record),
            Err(e) => Reply::failure(e),
        },
        Command::Cancel { job_id } => Reply::Cancelled {
            cancelled: service.cancel(&job_id).await,
        },
        Command::Files { job_id } => match service.list_files(&job_id).await {
            Ok(files) => Reply::Files { files },
            Err(e) => Reply::failure(e),
        },
        Command::Download { job_id, filename } => {
            match service.file_download_path(&job_id, &filename).await {
                Ok(path) => Reply::Download { path },
                Err(e) => Reply::failure(e),
            }
        }
        Command::Health => Reply::Health(service.health().await),
        Command::Sweep => {
            let records = service.sweep_status_now().await;
            let directories = service.sweep_files_now().await;
            match (records, directories) {
                (Ok(records), Ok(directories)) => Reply::Swept {
                    records,
                    directories,
                },
                (Err(e), _) | (_, Err(e)) => Reply::failure(e),
            }
        }
    }
}

/// Parse one input line and run it.
pub async fn handle_line(service: &ReportService, line: &str) -> Reply {
    match serde_json::from_str::<Command>(line) {
        Ok(command) => handle(service, command).await,
        Err(e) => {
            tracing::warn!("Ignoring malformed command: {}", e);
            Reply::error(format!("malformed command: {e}"))
        }
    }
}

/// Serve commands from stdin until it closes.
pub async fn serve_stdin(service: Arc<ReportService>) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reply = handle_line(&service, line).await;
        let mut encoded = serde_json::to_vec(&reply).map_err(std::io::Error::other)?;
        encoded.push(b'\n');
        stdout.write_all(&encoded).await?;
        stdout.flush().await?;
    }
    Ok(())
}
