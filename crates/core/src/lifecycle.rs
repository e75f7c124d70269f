//! Job lifecycle controller.
//!
//! Tracks one remote submission at a time through
//! `Idle -> Queued -> Executing -> Completed | Failed | Interrupted`.
//! Polling is caller-driven: every call performs at most one transport
//! round-trip and nothing runs in the background.
//!
//! The remote server is reached through [`Transport`], so the state machine
//! can be driven by the ComfyUI HTTP client or by an in-memory fake.

use std::future::Future;

use serde::Serialize;
use serde_json::Value;

use crate::graph::Graph;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// Server-assigned handle of a queued job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    /// Server-assigned prompt identifier.
    pub prompt_id: String,
    /// Queue position reported at submission, if any.
    pub queue_number: Option<i64>,
}

/// Answer to a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollResponse {
    /// `true` while the job is queued or running, `false` once finished.
    pub executing: bool,
}

/// Remote calls consumed by [`JobController`].
///
/// Implementations perform one request/response round-trip per call and
/// must bound it with a timeout. No retries happen at this layer.
pub trait Transport: Send + Sync {
    /// Transport-level failure (network, timeout, non-success status, ...).
    type Error: std::error::Error + Send + Sync + 'static;

    /// Queue `workflow` for execution on behalf of `client_id`.
    fn submit(
        &self,
        workflow: &Value,
        client_id: &str,
    ) -> impl Future<Output = Result<JobHandle, Self::Error>> + Send;

    /// Ask whether `job` is still executing.
    ///
    /// `Ok(None)` means the server gave no usable answer (e.g. it no longer
    /// knows the job).
    fn poll(
        &self,
        job: &JobHandle,
        client_id: &str,
    ) -> impl Future<Output = Result<Option<PollResponse>, Self::Error>> + Send;

    /// Request cancellation of `job`.
    fn interrupt(
        &self,
        job: &JobHandle,
        client_id: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of the operator's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Idle,
    Queued,
    Executing,
    Completed,
    Failed,
    Interrupted,
}

impl JobState {
    /// A submission is outstanding on the server.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Queued | Self::Executing)
    }

    /// The job ended; the UI has not acknowledged it yet.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Interrupted)
    }
}

/// One remote submission as seen by the operator.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    /// Generated once per operator instance, reused for every submission.
    pub client_id: String,
    /// Present only after a successful submission.
    pub handle: Option<JobHandle>,
    pub state: JobState,
    pub submitted_at: Option<Timestamp>,
}

/// Result of [`JobController::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Submitted(JobHandle),
    /// A job is already queued or executing; nothing was sent.
    AlreadyInFlight,
    Failed(String),
}

/// Result of [`JobController::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// No job is queued or executing; nothing was sent.
    NotInFlight,
    Running,
    Completed,
    Failed(String),
}

/// Result of [`JobController::interrupt`].
#[derive(Debug, Clone, PartialEq)]
pub enum InterruptOutcome {
    /// No job is queued or executing; nothing was sent.
    NotInFlight,
    /// Local state was cleared. `server_error` holds the transport failure,
    /// if the cancellation request itself failed.
    Interrupted { server_error: Option<String> },
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Drives a single [`Job`] through its lifecycle.
#[derive(Debug, Clone)]
pub struct JobController {
    job: Job,
}

impl Default for JobController {
    fn default() -> Self {
        Self::new()
    }
}

impl JobController {
    /// Create an idle controller with a fresh UUID v4 client ID.
    pub fn new() -> Self {
        Self::with_client_id(uuid::Uuid::new_v4().to_string())
    }

    /// Create an idle controller with a caller-chosen client ID.
    pub fn with_client_id(client_id: String) -> Self {
        Self {
            job: Job {
                client_id,
                handle: None,
                state: JobState::Idle,
                submitted_at: None,
            },
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn client_id(&self) -> &str {
        &self.job.client_id
    }

    pub fn state(&self) -> JobState {
        self.job.state
    }

    pub fn handle(&self) -> Option<&JobHandle> {
        self.job.handle.as_ref()
    }

    /// Submit `graph` unless a job is already in flight.
    ///
    /// Success stores the new handle and moves to `Queued`. A transport
    /// failure moves to `Failed` with no handle stored.
    pub async fn submit<T: Transport>(&mut self, transport: &T, graph: &Graph) -> SubmitOutcome {
        if self.job.state.is_in_flight() {
            return SubmitOutcome::AlreadyInFlight;
        }

        let result = transport
            .submit(&graph.to_document(), &self.job.client_id)
            .await;
        match result {
            Ok(handle) => {
                self.job.handle = Some(handle.clone());
                self.job.state = JobState::Queued;
                self.job.submitted_at = Some(chrono::Utc::now());
                SubmitOutcome::Submitted(handle)
            }
            Err(e) => {
                self.job.handle = None;
                self.job.state = JobState::Failed;
                SubmitOutcome::Failed(e.to_string())
            }
        }
    }

    /// Perform one poll of the in-flight job.
    ///
    /// Transport failures and empty responses move to `Failed`; the handle
    /// is kept for diagnostics.
    pub async fn poll<T: Transport>(&mut self, transport: &T) -> PollOutcome {
        if !self.job.state.is_in_flight() {
            return PollOutcome::NotInFlight;
        }
        let Some(handle) = self.job.handle.as_ref() else {
            self.job.state = JobState::Failed;
            return PollOutcome::Failed("no job handle for in-flight job".to_string());
        };

        let result = transport.poll(handle, &self.job.client_id).await;
        match result {
            Ok(Some(PollResponse { executing: true })) => {
                self.job.state = JobState::Executing;
                PollOutcome::Running
            }
            Ok(Some(PollResponse { executing: false })) => {
                self.job.state = JobState::Completed;
                PollOutcome::Completed
            }
            Ok(None) => {
                self.job.state = JobState::Failed;
                PollOutcome::Failed("empty poll response".to_string())
            }
            Err(e) => {
                self.job.state = JobState::Failed;
                PollOutcome::Failed(e.to_string())
            }
        }
    }

    /// Best-effort cancellation of the in-flight job.
    ///
    /// The local state moves to `Interrupted` whether or not the server
    /// accepts the request.
    pub async fn interrupt<T: Transport>(&mut self, transport: &T) -> InterruptOutcome {
        if !self.job.state.is_in_flight() {
            return InterruptOutcome::NotInFlight;
        }

        let server_error = match self.job.handle.as_ref() {
            Some(handle) => transport
                .interrupt(handle, &self.job.client_id)
                .await
                .err()
                .map(|e| e.to_string()),
            None => None,
        };

        self.job.state = JobState::Interrupted;
        InterruptOutcome::Interrupted { server_error }
    }

    /// Record a failure that happened before anything was sent (e.g. a
    /// patch error). Ignored while a job is in flight.
    pub fn fail_submission(&mut self) {
        if self.job.state.is_in_flight() {
            return;
        }
        self.job.handle = None;
        self.job.state = JobState::Failed;
    }

    /// Return a terminal state to `Idle` once the UI has shown it.
    pub fn acknowledge(&mut self) {
        if self.job.state.is_terminal() {
            self.job.state = JobState::Idle;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
