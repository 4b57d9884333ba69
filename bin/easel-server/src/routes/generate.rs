//! Image generation entry point.
//!
//! The handler records the task and answers straight away; the generation
//! pipeline runs in the background and reports through the task record.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Extension, Json, Router, middleware};
use easel_core::GenerationRequest;
use easel_core::provider::{DEFAULT_ASPECT_RATIO, DEFAULT_IMAGE_SIZE};
use easel_core::task::new_task_id;
use tracing::info;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::middleware::auth::{Caller, require_session};
use crate::schemas::task::{GenerateRequest, GenerateResponse};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(generate),
    components(schemas(GenerateRequest, GenerateResponse))
)]
pub struct GenerateApi;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/generate", post(generate))
        .route_layer(middleware::from_fn_with_state(state, require_session))
}

fn non_blank(value: Option<String>, default: &str) -> String {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_owned())
}

#[utoipa::path(
    post,
    path = "/api/generate",
    tag = "generate",
    request_body = GenerateRequest,
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Task accepted", body = GenerateResponse),
        (status = 400, description = "Missing prompt"),
        (status = 401, description = "No valid session"),
    )
)]
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Extension(Caller(username)): Extension<Caller>,
    Json(body): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ServerError> {
    let prompt = body
        .prompt
        .map(|p| p.trim().to_owned())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ServerError::BadRequest("missing prompt".into()))?;

    let request = GenerationRequest {
        prompt,
        aspect_ratio: non_blank(body.aspect_ratio, DEFAULT_ASPECT_RATIO),
        image_size: non_blank(body.image_size, DEFAULT_IMAGE_SIZE),
        reference_urls: body
            .urls
            .into_iter()
            .map(|u| u.trim().to_owned())
            .filter(|u| !u.is_empty())
            .collect(),
    };

    let task = state.tasks.create(new_task_id(), username, request).await;
    info!(
        task_id = %task.id,
        username = %task.username,
        aspect_ratio = %task.request.aspect_ratio,
        image_size = %task.request.image_size,
        references = task.request.reference_urls.len(),
        "generation task created"
    );
    state.pipeline.spawn(task.clone());

    Ok(Json(GenerateResponse {
        success: true,
        task_id: task.id.clone(),
        task: task.into(),
    }))
}
