//! Durable task queue for long-running work.
//!
//! Tasks move `Pending -> Processing -> {Success | Failed | Cancelled}`;
//! terminal states are final. Every task is durably stored before it
//! counts as submitted, workers claim tasks through an atomic conditional
//! update, and a lock timeout reclaims tasks from crashed workers.

pub mod queue;
pub mod store;

pub use queue::{IngestRunner, QueueConfig, RunnerContext, TaskQueue, TaskRunner};
pub use store::{SqliteTaskStore, TaskStore};

use serde::{Deserialize, Serialize};

use crate::model::now_secs;

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "success" => Some(TaskStatus::Success),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

/// One unit of queued work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Runner selector, e.g. "ingest"
    pub kind: String,
    /// Runner-specific parameters
    pub parameters: serde_json::Value,
    /// Higher claims first among pending tasks
    pub priority: i64,
    pub status: TaskStatus,
    /// Completed fraction, 0.0..=1.0
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Identity of the lock-holding worker while Processing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    /// Cooperative cancellation flag, observed at checkpoints
    pub cancel_requested: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    /// Build a fresh Pending task with a random id.
    pub fn new(kind: &str, parameters: serde_json::Value, priority: i64) -> Self {
        let now = now_secs();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            parameters,
            priority,
            status: TaskStatus::Pending,
            progress: 0.0,
            message: None,
            result: None,
            error: None,
            worker: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        }
    }
}
