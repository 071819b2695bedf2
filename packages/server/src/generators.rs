//! Demo report generators.

use std::fmt::Write as _;
use std::time::Duration;

use engine::{
    FnGenerator, GenerateError, GenerateFuture, GenerateRequest, GenerateResult,
    GeneratorRegistry, blocking_generator,
};
use serde_json::Value;

/// Registry with every demo generator.
pub fn registry() -> GeneratorRegistry {
    let mut generators = GeneratorRegistry::new();

    // Demo: HTML page with a title and an optional table of rows
    generators.register(FnGenerator::new("html-summary", |request: GenerateRequest| {
        Box::pin(html_summary(request)) as GenerateFuture
    }));

    // Demo: CSV export, written synchronously on the blocking pool
    generators.register(blocking_generator("csv-export", |request: GenerateRequest| {
        let rows = rows(&request)?;
        let mut csv = String::new();
        for row in &rows {
            let line: Vec<String> = row.iter().map(|cell| csv_field(cell)).collect();
            csv.push_str(&line.join(","));
            csv.push('\n');
        }
        let path = request.output_dir.join("export.csv");
        std::fs::write(&path, csv)?;
        Ok(vec![path])
    }));

    // Demo: slow job that honours cancellation
    generators.register(FnGenerator::new("sleep", |request: GenerateRequest| {
        Box::pin(sleep(request)) as GenerateFuture
    }));

    generators
}

async fn html_summary(request: GenerateRequest) -> GenerateResult {
    let title = request
        .arguments
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("Report");
    let rows = rows(&request)?;
    request.progress.report(30, "Rendering summary");

    let title = escape(title);
    let mut html = format!("<html><head><title>{title}</title></head><body><h1>{title}</h1>");
    if !rows.is_empty() {
        html.push_str("<table>");
        for row in &rows {
            html.push_str("<tr>");
            for cell in row {
                let _ = write!(html, "<td>{}</td>", escape(cell));
            }
            html.push_str("</tr>");
        }
        html.push_str("</table>");
    }
    html.push_str("</body></html>");

    let path = request.output_dir.join("summary.html");
    tokio::fs::write(&path, html).await?;
    Ok(vec![path])
}

async fn sleep(request: GenerateRequest) -> GenerateResult {
    let seconds = request
        .arguments
        .get("seconds")
        .and_then(Value::as_u64)
        .unwrap_or(5);
    tracing::info!("Job {} sleeping for {} seconds", request.job_id, seconds);

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = request.cancel.cancelled() => {
            return Err(GenerateError::Failed("interrupted".into()));
        }
    }

    let path = request.output_dir.join("slept.json");
    tokio::fs::write(&path, format!("{{\"seconds\":{seconds}}}")).await?;
    Ok(vec![path])
}

/// `arguments.rows`: an array of arrays of scalars.
fn rows(request: &GenerateRequest) -> Result<Vec<Vec<String>>, GenerateError> {
    let Some(rows) = request.arguments.get("rows") else {
        return Ok(Vec::new());
    };
    let rows = rows
        .as_array()
        .ok_or_else(|| GenerateError::InvalidArguments("rows must be an array".into()))?;

    rows.iter()
        .map(|row| {
            let cells = row.as_array().ok_or_else(|| {
                GenerateError::InvalidArguments("each row must be an array".into())
            })?;
            Ok(cells.iter().map(cell_text).collect())
        })
        .collect()
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn csv_field(cell: &str) -> String {
    if cell.contains([',', '"', '\n']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}
