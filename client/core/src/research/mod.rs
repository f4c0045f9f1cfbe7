//! Deep Research Jobs
//!
//! Long-running, multi-phase research runs on the platform: the status
//! model, the wire payloads, the job endpoints and the controller that
//! polls a job to completion.

mod api;
mod controller;
mod job;
mod status;

pub use api::{HttpResearchApi, ResearchApi, RESEARCH_JOBS_PATH};
pub use controller::{
    outcome_for, JobController, JobError, JobSnapshot, CANCELLED_BY_USER, DEFAULT_POLL_INTERVAL,
};
pub use job::{
    CancelRequest, ExecutionStep, ExportFormat, IntermediateAnswer, Job, JobId, JobOutcome,
    JobPayload, JobStatusReport, ResearchParams, ResearchResult, Source, StartJobRequest,
};
pub use status::{JobStatus, ResearchPhase};
