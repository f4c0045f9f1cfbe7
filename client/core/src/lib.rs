//! ragstream Core - Streaming Consumer and Research Job Orchestration
//!
//! This crate holds the client-side logic behind the chat and deep research
//! features of a retrieval-augmented generation platform. It has no
//! rendering code; the `ragstream` CLI is one consumer, any UI could be
//! another.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                          Caller (CLI / UI)                         │
//! └───────────────┬───────────────────────────────────┬───────────────┘
//!                 │ StreamEvent                        │ JobSnapshot
//! ┌───────────────┴───────────────┐   ┌────────────────┴──────────────┐
//! │       StreamingSession        │   │         JobController         │
//! │  ┌─────────────────────────┐  │   │  start / poll / fetch / cancel│
//! │  │ EventClassifier         │  │   │  ┌─────────────────────────┐  │
//! │  ├─────────────────────────┤  │   │  │ ResearchApi (trait)     │  │
//! │  │ FrameDecoder            │  │   │  └─────────────────────────┘  │
//! │  └─────────────────────────┘  │   │                               │
//! └───────────────┬───────────────┘   └────────────────┬──────────────┘
//!                 └──────────────┬─────────────────────┘
//!                          ApiClient (reqwest)
//! ```
//!
//! # Key Types
//!
//! - [`StreamingSession`]: cancellable sequence of [`StreamEvent`]s from a
//!   chunked response body
//! - [`JobController`]: lifecycle of one deep research job
//! - [`ApiClient`]: HTTP plumbing configured from a [`ClientConfig`]
//!
//! # Quick Start
//!
//! ```ignore
//! use ragstream_core::{ApiClient, ChatRequest, StreamRequest, StreamingSession, load_config};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = load_config()?;
//! let client = ApiClient::new(&config)?;
//! let request = StreamRequest::chat(&ChatRequest::new("What is in the Q3 report?"));
//! let mut session = StreamingSession::open(&client, request, CancellationToken::new()).await?;
//!
//! while let Some(event) = session.next_event().await {
//!     println!("{:?}", event?);
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`transport`]: byte fragments to complete lines
//! - [`streaming`]: line classification and the streaming session
//! - [`events`]: domain events produced by streams
//! - [`research`]: research job model, API and controller
//! - [`client`]: shared HTTP client
//! - [`config`]: layered client configuration
//! - [`error`]: API error taxonomy

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod research;
pub mod streaming;
pub mod transport;

// Re-exports for convenience
pub use client::ApiClient;
pub use error::ApiError;
pub use events::{ProgressRecord, StreamEvent, StreamKind};
pub use transport::{FrameDecoder, FrameError};

// Streaming exports
pub use streaming::{
    ChatRequest, ClassifierStats, EventClassifier, ReaderExit, ReaderSummary,
    ResearchStreamRequest, StreamRequest, StreamingSession,
};

// Research exports
pub use research::{
    ExportFormat, HttpResearchApi, Job, JobController, JobError, JobId, JobOutcome, JobSnapshot,
    JobStatus, ResearchApi, ResearchParams, ResearchPhase, ResearchResult,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ClientConfig, ClientToml,
    ConfigError, ConfigOverrides, ConfigSource,
};
