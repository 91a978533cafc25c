// Copyright (c) 2025-2026 the specforge contributors
// SPDX-License-Identifier: Apache-2.0

//! Progress notifications for a pipeline run.
//!
//! The pipeline publishes [`TaskEvent`]s through a [`ProgressSink`] after
//! every stage and chunk. Publishing is fire-and-forget: a sink must never
//! block or fail the run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TaskEvent {
    Start {
        message: String,
    },
    Progress {
        message: String,
    },
    /// One chunk of a chunked stage was attempted.
    #[serde(rename_all = "camelCase")]
    Chunk {
        stage: String,
        index: usize,
        total: usize,
        estimated_tokens: usize,
        succeeded: bool,
    },
    /// A stage finished; `output` is its raw reply.
    #[serde(rename_all = "camelCase")]
    Complete {
        stage: String,
        output: String,
        estimated_tokens: usize,
        input_tokens: usize,
        output_tokens: usize,
        cost: f64,
        total_cost: f64,
    },
    #[serde(rename_all = "camelCase")]
    Finished {
        total_cost: f64,
        elapsed: String,
        elapsed_ms: u64,
    },
    Failed {
        stage: Option<String>,
        message: String,
    },
}

impl TaskEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Progress { .. } => "progress",
            Self::Chunk { .. } => "chunk",
            Self::Complete { .. } => "complete",
            Self::Finished { .. } => "finished",
            Self::Failed { .. } => "failed",
        }
    }
}

/// An event addressed to one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    pub task_id: String,
    #[serde(flatten)]
    pub event: TaskEvent,
}

impl TaskUpdate {
    pub fn new(task_id: impl Into<String>, event: TaskEvent) -> Self {
        Self {
            task_id: task_id.into(),
            event,
        }
    }

    /// Render as one Server-Sent-Events frame: `data: {json}\n\n`.
    pub fn to_sse_frame(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => format!("data: {}\n\n", json),
            Err(e) => {
                tracing::warn!(task_id = %self.task_id, "Failed to serialize task update: {}", e);
                String::new()
            }
        }
    }
}

/// Receiver of pipeline progress.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, task_id: &str, event: TaskEvent);
}

/// Writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn publish(&self, task_id: &str, event: TaskEvent) {
        match &event {
            TaskEvent::Failed { stage, message } => {
                tracing::error!(task_id, stage = ?stage, "{}", message);
            }
            TaskEvent::Complete {
                stage,
                estimated_tokens,
                input_tokens,
                output_tokens,
                cost,
                total_cost,
                ..
            } => {
                tracing::info!(
                    task_id,
                    stage = %stage,
                    estimated_tokens,
                    input_tokens,
                    output_tokens,
                    cost,
                    total_cost,
                    "Stage complete"
                );
            }
            other => tracing::info!(task_id, kind = other.kind(), "{:?}", other),
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn publish(&self, _task_id: &str, _event: TaskEvent) {}
}

/// In-process map from task id to a live listener.
///
/// A listener is registered per task and receives every [`TaskUpdate`] for
/// it. Once the receiving side is dropped the entry is removed on the next
/// publish. Events for a task without a listener are logged and dropped.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    clients: Mutex<HashMap<String, UnboundedSender<TaskUpdate>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a listener to `task_id`, replacing any previous one.
    pub fn register(&self, task_id: impl Into<String>) -> UnboundedReceiver<TaskUpdate> {
        let (tx, rx) = unbounded_channel();
        if let Ok(mut clients) = self.clients.lock() {
            clients.insert(task_id.into(), tx);
        }
        rx
    }

    pub fn unregister(&self, task_id: &str) {
        if let Ok(mut clients) = self.clients.lock() {
            clients.remove(task_id);
        }
    }

    pub fn is_registered(&self, task_id: &str) -> bool {
        self.clients
            .lock()
            .map(|clients| clients.contains_key(task_id))
            .unwrap_or(false)
    }
}

impl ProgressSink for ConnectionRegistry {
    fn publish(&self, task_id: &str, event: TaskEvent) {
        let Ok(mut clients) = self.clients.lock() else {
            return;
        };
        let Some(sender) = clients.get(task_id) else {
            tracing::debug!(task_id, kind = event.kind(), "No listener for task update");
            return;
        };
        if sender.send(TaskUpdate::new(task_id, event)).is_err() {
            tracing::debug!(task_id, "Listener went away; unregistering");
            clients.remove(task_id);
        }
    }
}
