//! Task status and management endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::info;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::task::{
    MessageResponse, TaskEnvelope, TaskListResponse, TaskResponse, TaskResultResponse,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(list_tasks, get_task, cancel_task, delete_task),
    components(schemas(
        TaskResponse,
        TaskResultResponse,
        TaskListResponse,
        TaskEnvelope,
        MessageResponse
    ))
)]
pub struct TasksApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks", get(list_tasks))
        .route("/tasks/{id}", get(get_task).delete(delete_task))
        .route("/tasks/{id}/cancel", post(cancel_task))
}

#[utoipa::path(
    get,
    path = "/api/tasks",
    tag = "tasks",
    responses(
        (status = 200, description = "All tasks, newest first", body = TaskListResponse),
    )
)]
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<TaskListResponse> {
    let tasks = state.tasks.list().await;
    Json(TaskListResponse {
        success: true,
        tasks: tasks.into_iter().map(TaskResponse::from).collect(),
    })
}

#[utoipa::path(
    get,
    path = "/api/tasks/{id}",
    tag = "tasks",
    params(
        ("id" = String, Path, description = "ID of the task to retrieve")
    ),
    responses(
        (status = 200, description = "Task retrieved", body = TaskEnvelope),
        (status = 404, description = "Task not found"),
    )
)]
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskEnvelope>, ServerError> {
    let task = state
        .tasks
        .get(&id)
        .await
        .ok_or_else(|| ServerError::NotFound(format!("task {id} not found")))?;
    Ok(Json(TaskEnvelope {
        success: true,
        task: task.into(),
    }))
}

#[utoipa::path(
    post,
    path = "/api/tasks/{id}/cancel",
    tag = "tasks",
    params(
        ("id" = String, Path, description = "ID of the task to cancel")
    ),
    responses(
        (status = 200, description = "Task cancelled", body = MessageResponse),
        (status = 400, description = "Task is unknown or already finished"),
    )
)]
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ServerError> {
    if !state.tasks.cancel(&id).await {
        let reason = match state.tasks.get(&id).await {
            Some(task) => format!("task {id} is not cancellable (status: {})", task.status),
            None => format!("task {id} not found"),
        };
        return Err(ServerError::BadRequest(reason));
    }
    info!(task_id = %id, "cancel requested");
    Ok(Json(MessageResponse::ok("task cancelled")))
}

#[utoipa::path(
    delete,
    path = "/api/tasks/{id}",
    tag = "tasks",
    params(
        ("id" = String, Path, description = "ID of the task to delete")
    ),
    responses(
        (status = 200, description = "Task deleted", body = MessageResponse),
        (status = 404, description = "Task not found"),
    )
)]
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ServerError> {
    if !state.tasks.delete(&id).await {
        return Err(ServerError::NotFound(format!("task {id} not found")));
    }
    info!(task_id = %id, "task deleted");
    Ok(Json(MessageResponse::ok("task deleted")))
}
