//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (workflow submission, cancellation,
//! interruption, history and queue retrieval) using [`reqwest`], and
//! implements the lifecycle [`Transport`] on top of it.

use std::time::Duration;

use serde::Deserialize;

use comfybox_core::lifecycle::{JobHandle, PollResponse, Transport};

use crate::messages::{prompt_status, History, PromptStatus, QueueSnapshot};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: Option<i64>,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The prompt ran and the server recorded an execution error.
    #[error("ComfyUI execution failed: {0}")]
    ExecutionFailed(String),
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    /// * `timeout` - Upper bound for each request/response round-trip.
    pub fn new(api_url: String, timeout: Duration) -> Result<Self, ComfyUIApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_url))
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID. Returns the server-assigned `prompt_id` and queue
    /// position.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Remove a prompt from the queue.
    ///
    /// Sends a `POST /queue` request asking ComfyUI to delete the
    /// specified prompt. Has no effect on a prompt already executing.
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let body = serde_json::json!({
            "delete": [prompt_id],
        });

        let response = self
            .client
            .post(format!("{}/queue", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Interrupt the currently running execution immediately.
    ///
    /// Sends a `POST /interrupt` request. This does not target a
    /// specific prompt -- it interrupts whatever is executing right now.
    pub async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        let response = self
            .client
            .post(format!("{}/interrupt", self.api_url))
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. The map is empty until
    /// the prompt has finished.
    pub async fn get_history(&self, prompt_id: &str) -> Result<History, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Retrieve the running and pending prompts (`GET /queue`).
    pub async fn get_queue(&self) -> Result<QueueSnapshot, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/queue", self.api_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Ask the server where `prompt_id` stands.
    ///
    /// The queue is read first; the history is only fetched once the
    /// prompt has left the queue.
    pub async fn prompt_status(&self, prompt_id: &str) -> Result<PromptStatus, ComfyUIApiError> {
        let queue = self.get_queue().await?;
        if queue.contains(prompt_id) {
            return Ok(prompt_status(prompt_id, &queue, None));
        }
        let history = self.get_history(prompt_id).await?;
        Ok(prompt_status(prompt_id, &queue, Some(&history)))
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Lifecycle transport
// ---------------------------------------------------------------------------

impl Transport for ComfyUIApi {
    type Error = ComfyUIApiError;

    async fn submit(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<JobHandle, Self::Error> {
        let response = self.submit_workflow(workflow, client_id).await?;
        tracing::info!(
            prompt_id = %response.prompt_id,
            number = ?response.number,
            client_id,
            "Workflow queued"
        );
        Ok(JobHandle {
            prompt_id: response.prompt_id,
            queue_number: response.number,
        })
    }

    async fn poll(
        &self,
        job: &JobHandle,
        _client_id: &str,
    ) -> Result<Option<PollResponse>, Self::Error> {
        match self.prompt_status(&job.prompt_id).await? {
            PromptStatus::Known(answer) => {
                tracing::debug!(prompt_id = %job.prompt_id, ?answer, "Polled prompt");
                Ok(answer)
            }
            PromptStatus::Failed(message) => {
                tracing::error!(prompt_id = %job.prompt_id, error = %message, "Execution failed");
                Err(ComfyUIApiError::ExecutionFailed(message))
            }
        }
    }

    /// `POST /interrupt` stops whatever runs on the server, so it is only
    /// sent while our prompt is the running one. A pending prompt is
    /// deleted from the queue instead.
    async fn interrupt(&self, job: &JobHandle, _client_id: &str) -> Result<(), Self::Error> {
        let queue = self.get_queue().await?;
        if queue.is_running(&job.prompt_id) {
            tracing::info!(prompt_id = %job.prompt_id, "Interrupting running execution");
            ComfyUIApi::interrupt(self).await
        } else {
            tracing::info!(prompt_id = %job.prompt_id, "Removing prompt from queue");
            self.cancel_execution(&job.prompt_id).await
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = ComfyUIApi::new("http://localhost:8188/".to_string(), DEFAULT_TIMEOUT).unwrap();
        assert_eq!(api.api_url(), "http://localhost:8188");
    }

    #[test]
    fn submit_response_without_number() {
        let resp: SubmitResponse = serde_json::from_str(r#"{"prompt_id":"abc"}"#).unwrap();
        assert_eq!(resp.prompt_id, "abc");
        assert_eq!(resp.number, None);
    }

    #[test]
    fn submit_response_with_number() {
        let resp: SubmitResponse =
            serde_json::from_str(r#"{"prompt_id":"abc","number":7,"node_errors":{}}"#).unwrap();
        assert_eq!(resp.number, Some(7));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_request_error() {
        // Port 9 (discard) is not served on test hosts.
        let api = ComfyUIApi::new("http://127.0.0.1:9".to_string(), Duration::from_secs(2)).unwrap();
        let job = JobHandle {
            prompt_id: "abc".to_string(),
            queue_number: None,
        };
        assert_matches!(
            Transport::poll(&api, &job, "client").await,
            Err(ComfyUIApiError::Request(_))
        );
        assert_matches!(
            api.submit_workflow(&serde_json::json!({}), "client").await,
            Err(ComfyUIApiError::Request(_))
        );
    }
}
