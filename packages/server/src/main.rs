//! `reportd`: runs the report engine and takes commands as JSON lines on
//! stdin, one reply per line on stdout.
//!
//! ```text
//! {"op":"submit","name":"Q3","jobDefinitionUri":"html-summary","arguments":{"title":"Q3"}}
//! {"op":"status","jobId":"01J..."}
//! {"op":"health"}
//! ```

mod commands;
mod generators;

use std::sync::Arc;

use engine::{ReportService, ServiceConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = ServiceConfig::from_env()?;
    let service = Arc::new(ReportService::start(config, generators::registry()).await?);

    let mut intake = tokio::spawn(commands::serve_stdin(Arc::clone(&service)));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => tracing::info!("Received Ctrl-C"),
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        },
        finished = &mut intake => match finished {
            Ok(Ok(())) => tracing::info!("Input closed"),
            Ok(Err(e)) => tracing::error!("Reading commands failed: {}", e),
            Err(e) => tracing::error!("Command loop crashed: {}", e),
        },
    }

    // Stop taking commands before the engine winds down.
    intake.abort();
    service.shutdown().await;
    Ok(())
}
