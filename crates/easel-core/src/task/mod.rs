//! Task records and their lifecycle rules.

mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::gallery::ImageRecord;
use crate::provider::{GenerationRequest, ProviderKind};

pub use store::{DEFAULT_RETENTION, RESTART_REASON, TaskStore};

/// Owner recorded for snapshots written before owners were tracked.
pub const ANONYMOUS_OWNER: &str = "anonymous";

/// Lifecycle state of a generation task.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    RunningFallback,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal states never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// A provider is (or is about to be) working on the task.
    pub fn is_running(self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::RunningFallback)
    }
}

/// What a succeeded task produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutput {
    pub images: Vec<ImageRecord>,
    pub provider: ProviderKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(default = "anonymous_owner")]
    pub username: String,
    #[serde(flatten)]
    pub request: GenerationRequest,
    #[serde(default)]
    pub has_reference_images: bool,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<TaskOutput>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

fn anonymous_owner() -> String {
    ANONYMOUS_OWNER.to_owned()
}

impl Task {
    pub fn new(id: impl Into<String>, owner: impl Into<String>, request: GenerationRequest) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            username: owner.into(),
            has_reference_images: !request.reference_urls.is_empty(),
            request,
            status: TaskStatus::Pending,
            progress: 0,
            error: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge `patch` into the task.
    ///
    /// Terminal tasks ignore the patch. While running, progress only moves
    /// forward. Entering `failed` or `cancelled` resets progress to 0 and
    /// entering `succeeded` pins it at 100. Returns `true` when this call moved
    /// the task into a terminal state.
    pub fn apply(&mut self, patch: TaskPatch, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(progress) = patch.progress {
            let progress = progress.min(100);
            self.progress = if self.status.is_running() {
                self.progress.max(progress)
            } else {
                progress
            };
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
        if let Some(result) = patch.result {
            self.result = Some(result);
        }

        match self.status {
            TaskStatus::Failed | TaskStatus::Cancelled => self.progress = 0,
            TaskStatus::Succeeded => self.progress = 100,
            _ => {}
        }
        self.updated_at = now;
        self.status.is_terminal()
    }
}

/// A partial update for [`TaskStore::update`]. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub error: Option<String>,
    pub result: Option<TaskOutput>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn succeeded(output: TaskOutput) -> Self {
        Self {
            status: Some(TaskStatus::Succeeded),
            progress: Some(100),
            error: None,
            result: Some(output),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            progress: Some(0),
            error: Some(reason.into()),
            result: None,
        }
    }
}

/// A fresh task id: creation time plus a random suffix.
pub fn new_task_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("task_{}_{}", Utc::now().timestamp_millis(), &suffix[..9])
}
