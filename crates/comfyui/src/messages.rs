//! ComfyUI history and queue response types.
//!
//! `GET /history/{prompt_id}` answers with an object keyed by prompt ID
//! (empty while the prompt has not finished), and `GET /queue` lists the
//! running and pending prompts as positional arrays
//! `[number, prompt_id, prompt, extra_data, outputs_to_execute]`. This
//! module deserializes both and turns them into a single poll answer.

use std::collections::HashMap;

use serde::Deserialize;

use comfybox_core::lifecycle::PollResponse;

/// Response of `GET /history/{prompt_id}`, keyed by prompt ID.
pub type History = HashMap<String, HistoryEntry>;

/// One finished prompt in the server history.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    /// Execution status; absent on servers predating status reporting.
    #[serde(default)]
    pub status: Option<HistoryStatus>,
    /// Raw node outputs keyed by node ID.
    #[serde(default)]
    pub outputs: serde_json::Value,
}

/// Execution status attached to a history entry.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryStatus {
    /// `"success"` or `"error"`.
    pub status_str: String,
    /// Execution events as `[event_name, payload]` pairs.
    #[serde(default)]
    pub messages: Vec<(String, serde_json::Value)>,
}

/// Response of `GET /queue`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default)]
    pub queue_running: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    pub queue_pending: Vec<Vec<serde_json::Value>>,
}

impl HistoryEntry {
    /// Whether the server recorded the execution as failed.
    pub fn is_error(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|status| status.status_str == "error")
    }

    /// Human-readable failure reason taken from the `execution_error` event,
    /// falling back to a generic message.
    pub fn error_message(&self) -> String {
        self.status
            .iter()
            .flat_map(|status| status.messages.iter())
            .filter(|(event, _)| event == "execution_error")
            .find_map(|(_, payload)| {
                let message = payload.get("exception_message")?.as_str()?;
                let node_id = payload.get("node_id").and_then(|n| n.as_str()).unwrap_or("?");
                Some(format!("node {node_id}: {}", message.trim()))
            })
            .unwrap_or_else(|| "execution failed".to_string())
    }
}

impl QueueSnapshot {
    /// Whether `prompt_id` is running or waiting in the queue.
    pub fn contains(&self, prompt_id: &str) -> bool {
        self.is_running(prompt_id) || lists(&self.queue_pending, prompt_id)
    }

    /// Whether `prompt_id` is the prompt the server is executing right now.
    pub fn is_running(&self, prompt_id: &str) -> bool {
        lists(&self.queue_running, prompt_id)
    }
}

fn lists(items: &[Vec<serde_json::Value>], prompt_id: &str) -> bool {
    items
        .iter()
        .any(|item| item.get(1).and_then(|id| id.as_str()) == Some(prompt_id))
}

/// Outcome of interpreting the server's view of one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptStatus {
    /// Answer for the lifecycle controller; `None` if the server does not
    /// know the prompt at all.
    Known(Option<PollResponse>),
    /// The prompt finished with an execution error.
    Failed(String),
}

/// Combine a queue snapshot and (if the queue no longer holds the prompt)
/// a later history lookup into one status.
///
/// The queue must be read before the history: a prompt leaves the queue
/// only after its history entry is written, so a prompt missing from both
/// is genuinely unknown to the server.
pub fn prompt_status(
    prompt_id: &str,
    queue: &QueueSnapshot,
    history: Option<&History>,
) -> PromptStatus {
    if queue.contains(prompt_id) {
        return PromptStatus::Known(Some(PollResponse { executing: true }));
    }

    match history.and_then(|history| history.get(prompt_id)) {
        Some(entry) if entry.is_error() => PromptStatus::Failed(entry.error_message()),
        Some(_) => PromptStatus::Known(Some(PollResponse { executing: false })),
        None => PromptStatus::Known(None),
    }
}

/// Parse a `GET /history/{prompt_id}` body.
pub fn parse_history(text: &str) -> Result<History, serde_json::Error> {
    serde_json::from_str(text)
}

/// Parse a `GET /queue` body.
pub fn parse_queue(text: &str) -> Result<QueueSnapshot, serde_json::Error> {
    serde_json::from_str(text)
}
