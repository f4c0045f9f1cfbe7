//! ragstream - Chat Streams and Deep Research from the Terminal
//!
//! Drives the streaming chat endpoint and the deep research job API of a RAG
//! platform, rendering events to stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Stream a chat answer
//! ragstream chat "What changed in the Q3 report?"
//!
//! # Run a deep research job to completion and save a report
//! ragstream research "Compare vendor SLAs" --namespace contracts --export report.md
//!
//! # Check on a job started elsewhere
//! ragstream status 3f2a9c
//!
//! # Point at another deployment, with verbose logging
//! RUST_LOG=debug ragstream --base-url https://rag.example.com/api/v1 chat "hi"
//! ```
//!
//! # Signals
//!
//! - `SIGINT` (Ctrl-C): cancel the running stream or job, then exit

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ragstream_core::{default_config_path, load_config_from_path, ConfigOverrides, ExportFormat};

/// Stream RAG chat answers and drive deep research jobs
#[derive(Parser, Debug)]
#[command(name = "ragstream")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "RAGSTREAM_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// API base URL (overrides config file and environment)
    #[arg(short = 'u', long, value_name = "URL")]
    base_url: Option<String>,

    /// Research status poll interval in milliseconds
    #[arg(long, value_name = "MS")]
    poll_interval_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "RAGSTREAM_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream a chat answer
    Chat {
        /// The message to send
        message: String,

        /// Continue an existing chat session
        #[arg(short, long)]
        session: Option<String>,

        /// Knowledge namespace
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Run a deep research job
    Research {
        /// The research question
        query: String,

        /// Knowledge namespace
        #[arg(short, long)]
        namespace: Option<String>,

        /// Iteration budget
        #[arg(short, long)]
        max_iterations: Option<u32>,

        /// Use the streaming research endpoint instead of a polled job
        #[arg(long)]
        stream: bool,

        /// Write an export of the finished job to this file
        #[arg(short, long, value_name = "FILE", conflicts_with = "stream")]
        export: Option<PathBuf>,
    },

    /// Show the status of a research job
    Status {
        /// Job identifier
        job_id: String,
    },

    /// Download a report of a research job
    Export {
        /// Job identifier
        job_id: String,

        /// Report format (markdown, pdf)
        #[arg(short, long, default_value = "markdown")]
        format: ExportFormat,

        /// Output file (defaults to `<job_id>.<ext>`)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("ragstream={level},ragstream_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancel `token` on the first Ctrl-C
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT, cancelling");
                token.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to install SIGINT handler"),
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let mut overrides = ConfigOverrides::new();
    if let Some(url) = &args.base_url {
        overrides = overrides.with_base_url(url.clone());
    }
    if let Some(ms) = args.poll_interval_ms {
        overrides = overrides.with_poll_interval_ms(ms);
    }
    if let Command::Research {
        namespace,
        max_iterations,
        ..
    } = &args.command
    {
        if let Some(namespace) = namespace {
            overrides = overrides.with_namespace(namespace.clone());
        }
        if let Some(n) = max_iterations {
            overrides = overrides.with_max_iterations(*n);
        }
    }

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(config_path).context("Failed to load configuration")?;
    overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        base_url = %config.base_url,
        source = ?config.source(),
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match args.command {
        Command::Chat {
            message,
            session,
            namespace,
        } => commands::chat(&config, message, session, namespace, cancel).await,
        Command::Research {
            query,
            stream: true,
            ..
        } => commands::research_stream(&config, query, cancel).await,
        Command::Research { query, export, .. } => {
            commands::research_job(&config, query, export, cancel).await
        }
        Command::Status { job_id } => commands::status(&config, job_id).await,
        Command::Export {
            job_id,
            format,
            output,
        } => commands::export(&config, job_id, format, output).await,
    }
}
