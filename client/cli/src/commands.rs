//! Subcommand Implementations
//!
//! Each command builds its own client from the loaded configuration, runs
//! to completion or until the interrupt token fires, and renders to stdout.
//! Progress and diagnostics go to stderr.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use ragstream_core::{
    ApiClient, ApiError, ChatRequest, ClientConfig, ExportFormat, HttpResearchApi,
    JobController, JobId, JobOutcome, ProgressRecord, ResearchApi, ResearchPhase,
    ResearchResult, ResearchStreamRequest, StreamEvent, StreamRequest, StreamingSession,
};

/// Time given to the background cancel request before the process exits
const CANCEL_GRACE: Duration = Duration::from_millis(500);

/// Reason sent to the server when the user interrupts a job
const INTERRUPT_REASON: &str = "interrupted from the command line";

// ============================================================================
// Streaming
// ============================================================================

/// Stream a chat answer to stdout
pub async fn chat(
    config: &ClientConfig,
    message: String,
    session_id: Option<String>,
    namespace: Option<String>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut request = ChatRequest::new(message);
    if let Some(session_id) = session_id {
        request = request.with_session(session_id);
    }
    if let Some(namespace) = namespace {
        request = request.with_namespace(namespace);
    }

    let client = ApiClient::new(config).context("Failed to build HTTP client")?;
    run_stream(&client, StreamRequest::chat(&request), cancel).await
}

/// Stream a research run to stdout
pub async fn research_stream(
    config: &ClientConfig,
    query: String,
    cancel: CancellationToken,
) -> Result<()> {
    let request = ResearchStreamRequest {
        query,
        params: config.research.clone(),
    };

    let client = ApiClient::new(config).context("Failed to build HTTP client")?;
    run_stream(&client, StreamRequest::research(&request), cancel).await
}

async fn run_stream(
    client: &ApiClient,
    request: StreamRequest,
    cancel: CancellationToken,
) -> Result<()> {
    let path = request.path.clone();
    let mut session = match StreamingSession::open(client, request, cancel).await {
        Ok(session) => session,
        Err(ApiError::Cancelled) => {
            eprintln!("Cancelled");
            return Ok(());
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to open stream {path}")),
    };

    let mut stdout = std::io::stdout();
    let mut wrote_tokens = false;

    while let Some(item) = session.next_event().await {
        match item.context("Stream interrupted")? {
            StreamEvent::Metadata(metadata) => {
                if let Some(session_id) = metadata.get("session_id").and_then(|v| v.as_str()) {
                    eprintln!("session: {session_id}");
                }
                debug!(?metadata, "Stream metadata");
            }
            StreamEvent::Token(token) => {
                write!(stdout, "{token}")?;
                stdout.flush()?;
                wrote_tokens = true;
            }
            StreamEvent::Progress(record) => render_progress(&record),
            StreamEvent::Result(result) => render_result(&result),
            StreamEvent::Error(message) => eprintln!("error: {message}"),
            StreamEvent::Done => break,
        }
    }

    if wrote_tokens {
        writeln!(stdout)?;
    }
    if session.is_cancelled() {
        eprintln!("Cancelled");
    }

    if let Some(summary) = session.finish().await {
        debug!(?summary, "Stream finished");
    }
    Ok(())
}

// ============================================================================
// Research jobs
// ============================================================================

/// Run a polled research job to its outcome
pub async fn research_job(
    config: &ClientConfig,
    query: String,
    export: Option<PathBuf>,
    cancel: CancellationToken,
) -> Result<()> {
    let client = ApiClient::new(config).context("Failed to build HTTP client")?;
    let api: Arc<dyn ResearchApi> = Arc::new(HttpResearchApi::new(client));
    let controller = JobController::new(api, config.poll_interval);

    let id = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            eprintln!("Cancelled");
            return Ok(());
        }
        started = controller.start(query, config.research.clone()) => {
            started.context("Failed to start research job")?
        }
    };
    eprintln!("job: {id}");

    let mut updates = controller.subscribe();
    let mut printed = 0usize;

    let outcome = loop {
        let snapshot = updates.borrow_and_update().clone();
        for record in snapshot.history.iter().skip(printed) {
            render_progress(record);
        }
        printed = snapshot.history.len();
        if let Some(outcome) = snapshot.outcome {
            break outcome;
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                controller.cancel(INTERRUPT_REASON);
                tokio::time::sleep(CANCEL_GRACE).await;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    bail!("Research controller stopped before job {id} finished");
                }
            }
        }
    };

    match outcome {
        JobOutcome::Completed(result) => {
            render_result(&result);
            if let Some(path) = export {
                let format = format_for_path(&path);
                let bytes = controller
                    .export(format)
                    .await
                    .with_context(|| format!("Failed to export job {id}"))?;
                write_file(&path, &bytes)?;
            }
            Ok(())
        }
        JobOutcome::Failed(message) => bail!("Research job {id} failed: {message}"),
        JobOutcome::Cancelled(message) => {
            eprintln!("Research job {id} {message}");
            Ok(())
        }
    }
}

/// Print the status of a job
pub async fn status(config: &ClientConfig, job_id: String) -> Result<()> {
    let api = HttpResearchApi::new(ApiClient::new(config).context("Failed to build HTTP client")?);
    let id = JobId::new(job_id);
    let report = api
        .job_status(&id)
        .await
        .with_context(|| format!("Failed to fetch status of job {id}"))?;

    let phase = ResearchPhase::from_status(&report.status);
    println!("job:      {id}");
    println!("status:   {} ({})", report.status, phase.label());
    if let Some(percent) = report.progress_percent {
        println!("progress: {percent:.0}%");
    }
    if let Some(step) = &report.current_step {
        println!("step:     {step}");
    }
    if let Some(ms) = report.estimated_time_remaining_ms {
        println!("eta:      {}s", ms / 1000);
    }
    for step in &report.execution_steps {
        println!("  - {} [{}]", step.step_type, step.status);
    }
    Ok(())
}

/// Download a report of a job
pub async fn export(
    config: &ClientConfig,
    job_id: String,
    format: ExportFormat,
    output: Option<PathBuf>,
) -> Result<()> {
    let api = HttpResearchApi::new(ApiClient::new(config).context("Failed to build HTTP client")?);
    let id = JobId::new(job_id);
    let bytes = api
        .export(&id, format)
        .await
        .with_context(|| format!("Failed to export job {id}"))?;

    let path = output.unwrap_or_else(|| default_export_path(&id, format));
    write_file(&path, &bytes)
}

// ============================================================================
// Rendering
// ============================================================================

fn render_progress(record: &ProgressRecord) {
    match record.percent() {
        Some(percent) => eprintln!("[{}] {} ({percent}%)", record.phase, record.message),
        None => eprintln!("[{}] {}", record.phase, record.message),
    }
}

fn render_result(result: &ResearchResult) {
    println!("{}", result.final_answer);

    if !result.sources.is_empty() {
        println!();
        println!("Sources:");
        for (i, source) in result.sources.iter().enumerate() {
            let name = source
                .title
                .as_deref()
                .or(source.id.as_deref())
                .unwrap_or("untitled");
            println!("  [{}] {name}", i + 1);
        }
    }
    if let Some(confidence) = result.confidence {
        println!();
        println!("Confidence: {:.0}%", confidence * 100.0);
    }
}

// ============================================================================
// Files
// ============================================================================

fn format_for_path(path: &Path) -> ExportFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("pdf") => ExportFormat::Pdf,
        _ => ExportFormat::Markdown,
    }
}

fn default_export_path(id: &JobId, format: ExportFormat) -> PathBuf {
    PathBuf::from(format!("{id}.{}", format.extension()))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), bytes = bytes.len(), "Export written");
    eprintln!("wrote {}", path.display());
    Ok(())
}
