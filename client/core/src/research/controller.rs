//! Research Job Controller
//!
//! Drives one deep research job through start, poll, result fetch and
//! cancel, and publishes every change as a [`JobSnapshot`].
//!
//! # Architecture
//!
//! ```text
//! start() ──► POST /research/deep ──► spawn poll loop
//!                                        │ every poll_interval
//!                                        ▼
//!                                   GET .../status ──► apply (lock) ──► watch
//!                                        │ terminal status
//!                                        ▼
//!                                   GET .../{id}    ──► outcome (once)
//! ```
//!
//! # Invariants
//!
//! - At most one status request is outstanding: each tick awaits its fetch
//!   before the next tick is taken.
//! - Job status only moves forward; backwards reports are logged and
//!   ignored.
//! - The full result is fetched exactly once, after the first terminal
//!   status. A local cancel never fetches it.
//! - State is mutated under one lock that is never held across an await.
//! - The poll task never outlives the controller, nor the job it was
//!   started for.
//! - Overlapping `start` calls resolve to the most recent one; the stored
//!   poller always belongs to the installed job.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::events::ProgressRecord;

use super::api::ResearchApi;
use super::job::{
    CancelRequest, ExportFormat, Job, JobId, JobOutcome, JobPayload, JobStatusReport,
    ResearchParams, StartJobRequest,
};
use super::status::JobStatus;

/// Outcome text for a locally cancelled job
pub const CANCELLED_BY_USER: &str = "cancelled by user";

/// Reason sent for a job whose start was overtaken by a newer one
const SUPERSEDED_REASON: &str = "superseded by a newer job";

/// Default interval between status polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Errors from controller operations
#[derive(Debug, Error)]
pub enum JobError {
    /// The operation needs a started job
    #[error("No active research job")]
    NoActiveJob,

    /// The start response did not identify the job
    #[error("Start response did not include a job id")]
    MissingJobId,

    /// A later `start` replaced this one before the server answered
    #[error("Research job was superseded by a newer start")]
    Superseded,

    /// The API call failed
    #[error(transparent)]
    Api(#[from] ApiError),
}

// ============================================================================
// Snapshots
// ============================================================================

/// Published view of the controller's state
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobSnapshot {
    /// The current job, once started
    pub job: Option<Job>,
    /// One record per poll tick, in order
    pub history: Vec<ProgressRecord>,
    /// Terminal outcome, once known
    pub outcome: Option<JobOutcome>,
}

#[derive(Default)]
struct JobState {
    job: Option<Job>,
    history: Vec<ProgressRecord>,
    outcome: Option<JobOutcome>,
    /// Bumped whenever a new job replaces the old one
    generation: u64,
}

impl JobState {
    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job: self.job.clone(),
            history: self.history.clone(),
            outcome: self.outcome.clone(),
        }
    }
}

/// What a poll tick decided
enum Tick {
    Continue,
    Terminal(JobStatus),
    Stale,
}

struct Shared {
    state: Mutex<JobState>,
    updates: watch::Sender<JobSnapshot>,
}

impl Shared {
    fn publish(&self, state: &JobState) {
        self.updates.send_replace(state.snapshot());
    }

    fn apply_status(&self, generation: u64, tick: u32, report: &JobStatusReport) -> Tick {
        let mut guard = self.state.lock();
        if guard.generation != generation {
            return Tick::Stale;
        }

        let JobState { job, history, .. } = &mut *guard;
        let Some(job) = job.as_mut() else {
            return Tick::Stale;
        };
        if job.is_terminal() {
            return Tick::Stale;
        }

        match JobStatus::parse(&report.status) {
            Some(status) => {
                if !job.advance(status) {
                    debug!(
                        job_id = %job.id,
                        current = %job.status,
                        reported = %status,
                        "Ignoring backwards status"
                    );
                }
            }
            None => debug!(job_id = %job.id, status = %report.status, "Unknown job status"),
        }

        if let Some(percent) = report.progress_percent {
            job.set_progress(percent);
        }
        if !report.execution_steps.is_empty() {
            job.steps.clone_from(&report.execution_steps);
        }

        let message = report
            .current_step
            .clone()
            .filter(|step| !step.trim().is_empty())
            .unwrap_or_else(|| job.status.label().to_string());

        let mut record = ProgressRecord::new(job.phase, message, tick)
            .with_metadata("status", report.status.clone());
        if let Some(percent) = report.progress_percent {
            record = record.with_metadata("progress_percent", percent);
        }
        if let Some(remaining) = report.estimated_time_remaining_ms {
            record = record.with_metadata("estimated_time_remaining_ms", remaining);
        }

        let decision = if job.is_terminal() {
            Tick::Terminal(job.status)
        } else {
            Tick::Continue
        };

        history.push(record);
        self.publish(&guard);
        decision
    }

    fn finish(&self, generation: u64, status: JobStatus, fetched: Result<JobPayload, ApiError>) {
        let outcome = match fetched {
            Ok(payload) => outcome_for(status, &payload),
            Err(e) => {
                warn!(error = %e, "Failed to fetch research result");
                JobOutcome::Failed(format!("failed to fetch result: {e}"))
            }
        };

        let mut guard = self.state.lock();
        if guard.generation != generation || guard.outcome.is_some() {
            return;
        }
        if let Some(job) = guard.job.as_mut() {
            match &outcome {
                JobOutcome::Completed(result) => job.result = Some(result.as_ref().clone()),
                JobOutcome::Failed(message) => job.error = Some(message.clone()),
                JobOutcome::Cancelled(_) => {}
            }
            info!(job_id = %job.id, outcome = outcome.label(), "Research job finished");
        }
        guard.outcome = Some(outcome);
        self.publish(&guard);
    }
}

/// Decide a job's outcome from its terminal status and full payload
///
/// A non-empty `error` field wins over whatever the status says.
#[must_use]
pub fn outcome_for(status: JobStatus, payload: &JobPayload) -> JobOutcome {
    if let Some(error) = payload.error.as_deref().filter(|e| !e.trim().is_empty()) {
        return JobOutcome::Failed(error.to_string());
    }
    match status {
        JobStatus::Error => JobOutcome::Failed("research job failed".to_string()),
        JobStatus::Cancelled => JobOutcome::Cancelled("cancelled by server".to_string()),
        _ => JobOutcome::Completed(Box::new(payload.to_result())),
    }
}

// ============================================================================
// Poller
// ============================================================================

struct Poller {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Poller {
    fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

async fn poll_loop(
    api: Arc<dyn ResearchApi>,
    shared: Arc<Shared>,
    id: JobId,
    generation: u64,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    let mut tick: u32 = 0;
    let terminal = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        tick = tick.saturating_add(1);

        let report = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            report = api.job_status(&id) => report,
        };

        let report = match report {
            Ok(report) => report,
            Err(e) => {
                warn!(job_id = %id, tick, error = %e, "Status poll failed, skipping tick");
                continue;
            }
        };

        match shared.apply_status(generation, tick, &report) {
            Tick::Continue => {}
            Tick::Terminal(status) => break status,
            Tick::Stale => return,
        }
    };

    debug!(job_id = %id, status = %terminal, ticks = tick, "Polling stopped, fetching result");
    let fetched = tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        fetched = api.job_result(&id) => fetched,
    };
    shared.finish(generation, terminal, fetched);
}

// ============================================================================
// Controller
// ============================================================================

/// Owner of one research job's lifecycle
pub struct JobController {
    api: Arc<dyn ResearchApi>,
    poll_interval: Duration,
    shared: Arc<Shared>,
    poller: Mutex<Option<Poller>>,
}

impl JobController {
    /// Create a controller polling at `poll_interval`
    pub fn new(api: Arc<dyn ResearchApi>, poll_interval: Duration) -> Self {
        let (updates, _) = watch::channel(JobSnapshot::default());
        Self {
            api,
            poll_interval: if poll_interval.is_zero() {
                DEFAULT_POLL_INTERVAL
            } else {
                poll_interval
            },
            shared: Arc::new(Shared {
                state: Mutex::new(JobState::default()),
                updates,
            }),
            poller: Mutex::new(None),
        }
    }

    /// Interval between status polls
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Start a job, replacing any previous one
    ///
    /// The previous job's poller is stopped first. Polling begins only
    /// after the server has accepted the job. When calls overlap, the most
    /// recent one wins.
    ///
    /// # Errors
    ///
    /// - [`JobError::Api`] if the start request fails
    /// - [`JobError::MissingJobId`] if the response has no id
    /// - [`JobError::Superseded`] if a later `start` was made while this one
    ///   waited; the job it created is cancelled in the background
    ///
    /// No polling happens for a failed start.
    pub async fn start(
        &self,
        query: impl Into<String>,
        params: ResearchParams,
    ) -> Result<JobId, JobError> {
        self.stop_polling();
        let generation = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            state.job = None;
            state.history.clear();
            state.outcome = None;
            self.shared.publish(&state);
            state.generation
        };

        let request = StartJobRequest {
            query: query.into(),
            params,
        };
        let payload = self.api.start_job(&request).await?;
        if payload.id.trim().is_empty() {
            return Err(JobError::MissingJobId);
        }
        let id = JobId::new(payload.id.clone());

        // Held until the new poller is stored, so a concurrent start cannot
        // swap pollers between the check and the install.
        let mut poller = self.poller.lock();
        {
            let mut state = self.shared.state.lock();
            if state.generation != generation {
                drop(state);
                drop(poller);
                warn!(job_id = %id, "Research job superseded before it was installed");
                self.spawn_remote_cancel(id, SUPERSEDED_REASON.to_string());
                return Err(JobError::Superseded);
            }
            let mut job = Job::new(id.clone());
            if let Some(status) = JobStatus::parse(&payload.status) {
                if !status.is_terminal() {
                    job.advance(status);
                }
            }
            state.job = Some(job);
            self.shared.publish(&state);
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.api),
            Arc::clone(&self.shared),
            id.clone(),
            generation,
            self.poll_interval,
            cancel.clone(),
        ));
        if let Some(previous) = poller.replace(Poller { cancel, handle }) {
            previous.stop();
        }
        drop(poller);

        info!(job_id = %id, namespace = %request.params.namespace, "Research job started");
        Ok(id)
    }

    /// Cancel the current job
    ///
    /// Returns `false` without any network call when there is no job or it
    /// has already reached a terminal status. Otherwise polling stops, the
    /// job is marked cancelled at once, and a best-effort cancel request is
    /// sent in the background; its failure is only logged.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let id = {
            let mut state = self.shared.state.lock();
            let id = match state.job.as_mut() {
                Some(job) if !job.is_terminal() => {
                    job.advance(JobStatus::Cancelled);
                    job.id.clone()
                }
                _ => return false,
            };
            state.outcome = Some(JobOutcome::Cancelled(CANCELLED_BY_USER.to_string()));
            self.shared.publish(&state);
            id
        };

        // The poller ignores terminal jobs
        self.stop_polling();
        info!(job_id = %id, "Research job cancelled");

        self.spawn_remote_cancel(id, reason.into());
        true
    }

    /// Fire a best-effort cancel request without awaiting it
    fn spawn_remote_cancel(&self, id: JobId, reason: String) {
        let request = CancelRequest { reason };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let api = Arc::clone(&self.api);
                runtime.spawn(async move {
                    if let Err(e) = api.cancel_job(&id, &request).await {
                        warn!(job_id = %id, error = %e, "Remote cancel failed");
                    }
                });
            }
            Err(_) => warn!(job_id = %id, "No runtime, remote cancel not sent"),
        }
    }

    /// Download a report of the current job
    ///
    /// # Errors
    ///
    /// [`JobError::NoActiveJob`] before a job was started, otherwise any
    /// API failure.
    pub async fn export(&self, format: ExportFormat) -> Result<Bytes, JobError> {
        let id = self.job_id().ok_or(JobError::NoActiveJob)?;
        Ok(self.api.export(&id, format).await?)
    }

    /// Identifier of the current job
    #[must_use]
    pub fn job_id(&self) -> Option<JobId> {
        self.shared.state.lock().job.as_ref().map(|job| job.id.clone())
    }

    /// Current state
    #[must_use]
    pub fn snapshot(&self) -> JobSnapshot {
        self.shared.state.lock().snapshot()
    }

    /// Receive a snapshot after every change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.shared.updates.subscribe()
    }

    /// Snapshots as a stream, starting with the current one
    #[must_use]
    pub fn updates(&self) -> WatchStream<JobSnapshot> {
        WatchStream::new(self.subscribe())
    }

    /// Whether a job is running and not yet terminal
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared
            .state
            .lock()
            .job
            .as_ref()
            .is_some_and(|job| !job.is_terminal())
    }

    /// Wait until the current job has an outcome
    ///
    /// Returns `None` if no job has been started.
    pub async fn wait_for_outcome(&self) -> Option<JobOutcome> {
        let mut updates = self.subscribe();
        loop {
            {
                let snapshot = updates.borrow_and_update();
                if let Some(outcome) = &snapshot.outcome {
                    return Some(outcome.clone());
                }
                if snapshot.job.is_none() {
                    return None;
                }
            }
            if updates.changed().await.is_err() {
                return None;
            }
        }
    }

    fn stop_polling(&self) {
        if let Some(poller) = self.poller.lock().take() {
            poller.stop();
        }
    }
}

impl Drop for JobController {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

impl std::fmt::Debug for JobController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobController")
            .field("poll_interval", &self.poll_interval)
            .field("job_id", &self.job_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn payload(status: &str) -> JobPayload {
        JobPayload {
            id: "j1".to_string(),
            status: status.to_string(),
            final_answer: Some("answer".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_outcome_completed() {
        let outcome = outcome_for(JobStatus::Complete, &payload("complete"));
        match outcome {
            JobOutcome::Completed(result) => assert_eq!(result.final_answer, "answer"),
            other => panic!("expected completed, got {other:?}"),
        }
    }

    #[test]
    fn test_outcome_error_field_is_authoritative() {
        let mut body = payload("complete");
        body.error = Some("retriever timed out".to_string());
        assert_eq!(
            outcome_for(JobStatus::Complete, &body),
            JobOutcome::Failed("retriever timed out".to_string())
        );
    }

    #[test]
    fn test_outcome_from_status() {
        assert_eq!(
            outcome_for(JobStatus::Error, &payload("error")).label(),
            "failed"
        );
        assert_eq!(
            outcome_for(JobStatus::Cancelled, &payload("cancelled")).label(),
            "cancelled"
        );
    }

    #[test]
    fn test_empty_error_field_ignored() {
        let mut body = payload("complete");
        body.error = Some(String::new());
        assert!(outcome_for(JobStatus::Complete, &body).is_success());
    }
}
