//! Gallery endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use tracing::info;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::images::{ImageEnvelope, ImageListResponse, ImageResponse};
use crate::schemas::task::MessageResponse;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(list_images, get_image, delete_image),
    components(schemas(ImageResponse, ImageListResponse, ImageEnvelope))
)]
pub struct ImagesApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/images", get(list_images))
        .route("/images/{id}", get(get_image).delete(delete_image))
}

#[utoipa::path(
    get,
    path = "/api/images",
    tag = "images",
    responses(
        (status = 200, description = "All gallery images, newest first", body = ImageListResponse),
    )
)]
pub async fn list_images(State(state): State<Arc<AppState>>) -> Json<ImageListResponse> {
    let images: Vec<ImageResponse> = state
        .gallery
        .list()
        .await
        .into_iter()
        .map(ImageResponse::from)
        .collect();
    Json(ImageListResponse {
        success: true,
        total: images.len(),
        images,
    })
}

#[utoipa::path(
    get,
    path = "/api/images/{id}",
    tag = "images",
    params(
        ("id" = String, Path, description = "ID of the image to retrieve")
    ),
    responses(
        (status = 200, description = "Image retrieved", body = ImageEnvelope),
        (status = 404, description = "Image not found"),
    )
)]
pub async fn get_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ImageEnvelope>, ServerError> {
    let image = state
        .gallery
        .get(&id)
        .await
        .ok_or_else(|| ServerError::NotFound(format!("image {id} not found")))?;
    Ok(Json(ImageEnvelope {
        success: true,
        image: image.into(),
    }))
}

#[utoipa::path(
    delete,
    path = "/api/images/{id}",
    tag = "images",
    params(
        ("id" = String, Path, description = "ID of the image to delete")
    ),
    responses(
        (status = 200, description = "Image and file deleted", body = MessageResponse),
        (status = 404, description = "Image not found"),
        (status = 500, description = "File could not be removed"),
    )
)]
pub async fn delete_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ServerError> {
    let removed = state
        .gallery
        .delete(&id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("image {id} not found")))?;
    info!(image_id = %id, filename = %removed.filename, "image deleted");
    Ok(Json(MessageResponse::ok("image deleted")))
}
