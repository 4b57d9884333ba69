use easel_core::{Task, TaskOutput};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::schemas::images::ImageResponse;

/// Request body for `POST /api/generate`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// Text description of the desired image.
    #[serde(default)]
    pub prompt: Option<String>,
    /// e.g. `"1:1"`, `"16:9"` (default `"auto"`).
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    /// e.g. `"1K"`, `"2K"` (default `"1K"`).
    #[serde(default)]
    pub image_size: Option<String>,
    /// Reference image URLs. Providers drop any beyond their own cap.
    #[serde(default, alias = "referenceUrls")]
    pub urls: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskResultResponse {
    pub images: Vec<ImageResponse>,
    /// `primary` or `fallback`.
    pub provider: String,
}

impl From<TaskOutput> for TaskResultResponse {
    fn from(output: TaskOutput) -> Self {
        Self {
            images: output.images.into_iter().map(ImageResponse::from).collect(),
            provider: output.provider.to_string(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub id: String,
    pub username: String,
    pub prompt: String,
    pub aspect_ratio: String,
    pub image_size: String,
    pub reference_urls: Vec<String>,
    pub has_reference_images: bool,
    /// One of `pending`, `running`, `running_fallback`, `succeeded`,
    /// `failed`, `cancelled`.
    pub status: String,
    pub progress: u8,
    pub error: Option<String>,
    pub result: Option<TaskResultResponse>,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            username: task.username,
            prompt: task.request.prompt,
            aspect_ratio: task.request.aspect_ratio,
            image_size: task.request.image_size,
            reference_urls: task.request.reference_urls,
            has_reference_images: task.has_reference_images,
            status: task.status.to_string(),
            progress: task.progress,
            error: task.error,
            result: task.result.map(TaskResultResponse::from),
            created_at: task.created_at.timestamp_millis(),
            updated_at: task.updated_at.timestamp_millis(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub success: bool,
    pub task_id: String,
    pub task: TaskResponse,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskListResponse {
    pub success: bool,
    pub tasks: Vec<TaskResponse>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskEnvelope {
    pub success: bool,
    pub task: TaskResponse,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}
