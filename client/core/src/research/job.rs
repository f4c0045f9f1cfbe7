//! Research Job Types
//!
//! Wire payloads of the deep research endpoints and the local [`Job`] record
//! the controller maintains. The controller owns job state; callers only
//! read snapshots of it.

use serde::{Deserialize, Serialize};

use super::status::{JobStatus, ResearchPhase};

/// Research job identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Create a job ID from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Parameters of a deep research run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResearchParams {
    /// Knowledge namespace to search
    pub namespace: String,
    /// Maximum decomposition/retrieval iterations
    pub max_iterations: u32,
    /// Overall job timeout
    pub timeout_seconds: u64,
    /// Per-step timeout
    pub step_timeout_seconds: u64,
}

impl Default for ResearchParams {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            max_iterations: 5,
            timeout_seconds: 300,
            step_timeout_seconds: 60,
        }
    }
}

/// Body of `POST /research/deep`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StartJobRequest {
    /// The research question
    pub query: String,
    /// Run parameters, flattened into the body
    #[serde(flatten)]
    pub params: ResearchParams,
}

/// Body of `POST /research/deep/{id}/cancel`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CancelRequest {
    /// Why the job is being cancelled
    pub reason: String,
}

/// Export file format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Markdown document
    #[default]
    Markdown,
    /// PDF document
    Pdf,
}

impl ExportFormat {
    /// Query-string value
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Pdf => "pdf",
        }
    }

    /// Conventional file extension
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Pdf => "pdf",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "pdf" => Ok(Self::Pdf),
            other => Err(format!("unknown export format: {other}")),
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

/// One step of the server-side execution plan
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionStep {
    /// Step kind (decompose, retrieve, analyze, synthesize, ...)
    pub step_type: String,
    /// Raw step status
    pub status: String,
    /// What the step is doing
    pub description: Option<String>,
    /// Start timestamp as sent by the server
    pub started_at: Option<String>,
    /// Completion timestamp as sent by the server
    pub completed_at: Option<String>,
    /// Step duration
    pub duration_ms: Option<u64>,
    /// Step output, if any
    pub output: Option<serde_json::Value>,
}

/// A source cited by a research result
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Source {
    /// Document or chunk identifier
    pub id: Option<String>,
    /// Title of the source
    pub title: Option<String>,
    /// Quoted content
    pub content: Option<String>,
    /// Retrieval score
    pub score: Option<f64>,
    /// Remaining fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Answer to one decomposed sub-question
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntermediateAnswer {
    /// The sub-question
    pub question: String,
    /// Its answer
    pub answer: String,
    /// Remaining fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The finished product of a research run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    /// The synthesized answer
    pub final_answer: String,
    /// Sources backing the answer
    #[serde(default)]
    pub sources: Vec<Source>,
    /// Answers to sub-questions
    #[serde(default)]
    pub intermediate_answers: Vec<IntermediateAnswer>,
    /// Steps that produced the answer
    #[serde(default)]
    pub execution_steps: Vec<ExecutionStep>,
    /// Iterations used
    #[serde(default)]
    pub iterations: Option<u32>,
    /// Server-side confidence estimate
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Remaining fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Response of `GET /research/deep/{id}/status`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobStatusReport {
    /// Job identifier
    pub id: String,
    /// Raw status string (may be outside the known set)
    pub status: String,
    /// Description of the step in progress
    pub current_step: Option<String>,
    /// Completion estimate
    pub progress_percent: Option<f64>,
    /// Time estimate
    pub estimated_time_remaining_ms: Option<u64>,
    /// Steps so far
    pub execution_steps: Vec<ExecutionStep>,
}

/// Full job payload: response of start and of `GET /research/deep/{id}`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobPayload {
    /// Job identifier
    pub id: String,
    /// Raw status string
    pub status: String,
    /// The original query
    pub query: Option<String>,
    /// Synthesized answer, once complete
    pub final_answer: Option<String>,
    /// Sources backing the answer
    pub sources: Vec<Source>,
    /// Answers to sub-questions
    pub intermediate_answers: Vec<IntermediateAnswer>,
    /// Steps executed
    pub execution_steps: Vec<ExecutionStep>,
    /// Completion estimate
    pub progress_percent: Option<f64>,
    /// Error text; authoritative over `status` when present
    pub error: Option<String>,
}

impl JobPayload {
    /// Build the result view of this payload
    #[must_use]
    pub fn to_result(&self) -> ResearchResult {
        ResearchResult {
            final_answer: self.final_answer.clone().unwrap_or_default(),
            sources: self.sources.clone(),
            intermediate_answers: self.intermediate_answers.clone(),
            execution_steps: self.execution_steps.clone(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Local job record
// ============================================================================

/// Local view of a research job
#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    /// Job identifier
    pub id: JobId,
    /// Authoritative lifecycle status
    pub status: JobStatus,
    /// Display phase derived from `status`
    pub phase: ResearchPhase,
    /// Progress percentage (0-100)
    pub progress_percent: u8,
    /// Execution steps reported so far
    pub steps: Vec<ExecutionStep>,
    /// Failure text, if the job failed
    pub error: Option<String>,
    /// Full result, attached once after a terminal status
    pub result: Option<ResearchResult>,
}

impl Job {
    /// Create a new pending job
    #[must_use]
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            phase: JobStatus::Pending.phase(),
            progress_percent: 0,
            steps: Vec::new(),
            error: None,
            result: None,
        }
    }

    /// Move to `status` if the lifecycle order allows it
    ///
    /// Returns `false` (and leaves the job untouched) for backwards moves or
    /// any move out of a terminal status.
    pub fn advance(&mut self, status: JobStatus) -> bool {
        if !self.status.can_advance_to(status) {
            return false;
        }
        self.status = status;
        self.phase = status.phase();
        if status == JobStatus::Complete {
            self.progress_percent = 100;
        }
        true
    }

    /// Update progress percentage, clamped to 0-100 and never decreasing
    pub fn set_progress(&mut self, percent: f64) {
        let clamped = percent.clamp(0.0, 100.0).round() as u8;
        self.progress_percent = self.progress_percent.max(clamped);
    }

    /// Whether the job has reached a terminal status
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// How a job ended
#[derive(Clone, Debug, PartialEq)]
pub enum JobOutcome {
    /// Finished with a result
    Completed(Box<ResearchResult>),
    /// Failed on the server, or the result carried an error
    Failed(String),
    /// Cancelled by the user or the server
    Cancelled(String),
}

impl JobOutcome {
    /// Whether the job produced a usable result
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Short label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_start_request_body_shape() {
        let request = StartJobRequest {
            query: "What changed in Q3?".to_string(),
            params: ResearchParams::default(),
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "query": "What changed in Q3?",
                "namespace": "default",
                "max_iterations": 5,
                "timeout_seconds": 300,
                "step_timeout_seconds": 60,
            })
        );
    }

    #[test]
    fn test_status_report_tolerates_missing_fields() {
        let report: JobStatusReport =
            serde_json::from_str(r#"{"id":"j1","status":"retrieving"}"#).unwrap();
        assert_eq!(report.status, "retrieving");
        assert!(report.current_step.is_none());
        assert!(report.execution_steps.is_empty());
    }

    #[test]
    fn test_job_payload_to_result() {
        let payload: JobPayload = serde_json::from_value(serde_json::json!({
            "id": "j1",
            "status": "complete",
            "final_answer": "42",
            "sources": [{"id": "doc-1", "title": "Guide", "score": 0.9, "page": 3}],
            "intermediate_answers": [{"question": "q", "answer": "a"}],
        }))
        .unwrap();
        let result = payload.to_result();
        assert_eq!(result.final_answer, "42");
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.sources[0].extra.get("page"), Some(&serde_json::json!(3)));
        assert_eq!(result.intermediate_answers[0].answer, "a");
    }

    #[test]
    fn test_job_advance_is_monotonic() {
        let mut job = Job::new(JobId::new("j1"));
        assert!(job.advance(JobStatus::Retrieving));
        assert!(!job.advance(JobStatus::Decomposing));
        assert_eq!(job.status, JobStatus::Retrieving);
        assert_eq!(job.phase, ResearchPhase::Search);

        assert!(job.advance(JobStatus::Complete));
        assert_eq!(job.progress_percent, 100);
        assert!(!job.advance(JobStatus::Error));
        assert_eq!(job.status, JobStatus::Complete);
    }

    #[test]
    fn test_job_progress_clamped() {
        let mut job = Job::new(JobId::new("j1"));
        job.set_progress(42.4);
        assert_eq!(job.progress_percent, 42);
        job.set_progress(10.0);
        assert_eq!(job.progress_percent, 42);
        job.set_progress(250.0);
        assert_eq!(job.progress_percent, 100);
    }

    #[test]
    fn test_export_format_parse() {
        assert_eq!("md".parse::<ExportFormat>(), Ok(ExportFormat::Markdown));
        assert_eq!("PDF".parse::<ExportFormat>(), Ok(ExportFormat::Pdf));
        assert!("docx".parse::<ExportFormat>().is_err());
    }
}
