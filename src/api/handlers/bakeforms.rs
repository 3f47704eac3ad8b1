//! Bakeform inventory handlers.

use axum::{
    body::Body,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tokio_stream::StreamExt;

use crate::api::body::BodyReader;
use crate::api::error::ApiError;
use crate::api::state::{bakeform_to_info, list_to_map, ApiState};
use crate::api::types::{ApiErrorResponse, BakeformInfo, BakeformMap};
use crate::api::validation::validate_bakeform_name;

/// Body chunks buffered between the request and the writer thread.
const UPLOAD_CHANNEL_DEPTH: usize = 16;

/// List all bakeforms.
#[utoipa::path(
    get,
    path = "/",
    tag = "Bakeforms",
    responses(
        (status = 200, description = "Inventory keyed by name", body = BakeformMap)
    )
)]
pub async fn list_bakeforms(State(state): State<Arc<ApiState>>) -> Json<BakeformMap> {
    Json(list_to_map(&state.inventory().list()))
}

/// Upload a new disk image.
///
/// The body is the raw image. The inventory is reloaded afterwards, which
/// copies the new image's boot partition before responding.
#[utoipa::path(
    post,
    path = "/{name}",
    tag = "Bakeforms",
    params(
        ("name" = String, Path, description = "Bakeform name")
    ),
    request_body(content = String, description = "Raw disk image", content_type = "application/octet-stream"),
    responses(
        (status = 201, description = "Bakeform created", body = BakeformInfo),
        (status = 400, description = "Invalid name", body = ApiErrorResponse),
        (status = 403, description = "Bakeform already exists", body = ApiErrorResponse),
        (status = 500, description = "Storing or loading the image failed", body = ApiErrorResponse)
    )
)]
pub async fn upload_bakeform(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
    body: Body,
) -> Result<(StatusCode, Json<BakeformInfo>), ApiError> {
    validate_bakeform_name(&name)?;

    let (tx, mut reader) = BodyReader::channel(UPLOAD_CHANNEL_DEPTH);
    let inventory = state.inventory().clone();
    let upload_name = name.clone();
    let task =
        tokio::task::spawn_blocking(move || inventory.upload(&upload_name, &mut reader));

    let mut stream = body.into_data_stream();
    let mut complete = true;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(std::io::Error::other);
        let failed = chunk.is_err();
        // A closed channel means the writer already gave up; its error wins.
        if !tx.send(chunk).await || failed {
            complete = false;
            break;
        }
    }
    if complete {
        tx.finish();
    } else {
        drop(tx);
    }

    let bakeform = task.await??;
    tracing::info!(bakeform = %name, "bakeform uploaded");
    Ok((StatusCode::CREATED, Json(bakeform_to_info(&bakeform))))
}

/// Delete a bakeform's image and boot copy.
#[utoipa::path(
    delete,
    path = "/{name}",
    tag = "Bakeforms",
    params(
        ("name" = String, Path, description = "Bakeform name")
    ),
    responses(
        (status = 204, description = "Bakeform deleted"),
        (status = 404, description = "Bakeform not found", body = ApiErrorResponse),
        (status = 500, description = "Delete or reload failed", body = ApiErrorResponse)
    )
)]
pub async fn delete_bakeform(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let inventory = state.inventory().clone();
    let target = name.clone();
    tokio::task::spawn_blocking(move || inventory.delete(&target)).await??;

    tracing::info!(bakeform = %name, "bakeform deleted");
    Ok(StatusCode::NO_CONTENT)
}
