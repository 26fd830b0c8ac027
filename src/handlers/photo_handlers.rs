//! HTTP handlers for photo metadata, uploads, downloads, and the resize
//! trigger. The caller is identified by the `x-user-id` header.

use crate::{
    errors::AppError,
    models::{
        photo::{PhotoMetadata, PhotoView},
        size,
    },
    services::resizer::TriggerEvent,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const USER_HEADER: &str = "x-user-id";

/// Body of `POST /photos`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePhotoReq {
    pub id: Option<String>,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub mime_type: String,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePhotoResp {
    pub photo: PhotoView,
    pub upload_url: String,
}

/// Resolve the caller's owner name from the request headers.
async fn current_owner(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    let subject = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::unauthorized("missing user identity"))?;

    state
        .identity
        .resolve(subject)
        .await?
        .ok_or_else(|| AppError::unauthorized("unknown user"))
}

/// Load a photo the caller owns.
async fn owned_photo(
    state: &AppState,
    owner: &str,
    photo_id: &str,
) -> Result<PhotoMetadata, AppError> {
    let photo = state
        .metadata
        .get(photo_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("photo `{}` not found", photo_id)))?;

    if photo.owner != owner {
        return Err(AppError::forbidden(photo_id));
    }
    Ok(photo)
}

/// `GET /photos`: the caller's photos, oldest first.
pub async fn list_photos(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<PhotoView>>, AppError> {
    let owner = current_owner(&state, &headers).await?;
    let photos = state.metadata.get_by_owner(&owner).await?;
    info!("listPhotos: {} photos for user {}", photos.len(), owner);
    Ok(Json(photos.iter().map(PhotoMetadata::to_view).collect()))
}

/// `POST /photos`: create metadata ahead of an upload.
pub async fn create_photo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreatePhotoReq>,
) -> Result<impl IntoResponse, AppError> {
    let owner = current_owner(&state, &headers).await?;
    let id = req
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let metadata = PhotoMetadata::new(id, owner, req.filename, req.mime_type, req.description);
    if !metadata.is_valid() {
        warn!("upload: missing metadata for photo {}", metadata.id);
        return Err(AppError::bad_request("filename and mimeType are required"));
    }
    if state.metadata.get(&metadata.id).await?.is_some() {
        return Err(AppError::photo_exists(&metadata.id));
    }

    if !state.metadata.put(&metadata).await? {
        return Err(AppError::bad_request("metadata rejected"));
    }
    info!("upload prepared: photo {} for user {}", metadata.id, metadata.owner);

    let body = CreatePhotoResp {
        upload_url: format!("/uploads/{}", metadata.id),
        photo: metadata.to_view(),
    };
    Ok((StatusCode::CREATED, Json(body)))
}

/// `PUT /uploads/{photo_id}`: stage the photo's bytes, then resize in the
/// background.
pub async fn upload_photo(
    State(state): State<AppState>,
    Path(photo_id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let owner = current_owner(&state, &headers).await?;
    let photo = owned_photo(&state, &owner, &photo_id).await?;
    // the resizer only moves a staged upload into an empty ORIGINAL slot
    if photo.has_size(&size::ORIGINAL) {
        return Err(AppError::already_uploaded(&photo_id));
    }

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)));
    let size_bytes = state.content.stage(&photo_id, Box::pin(stream)).await?;
    info!("staged {} bytes for photo {}", size_bytes, photo_id);

    let resizer = state.resizer.clone();
    let id = photo_id.clone();
    tokio::spawn(async move {
        if let Err(err) = resizer.process(&id).await {
            error!(photo_id = %id, error = %err, "background resize failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "photoId": photo_id, "size": size_bytes })),
    ))
}

/// `POST /events`: deliver a batch of photo references to the resizer.
pub async fn trigger(
    State(state): State<AppState>,
    Json(event): Json<TriggerEvent>,
) -> Result<impl IntoResponse, AppError> {
    let received = event.records.len();
    let summary = state.resizer.process_batch(event.records).await;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "received": received,
            "processed": summary.processed,
            "skipped": summary.skipped,
            "failed": summary.failed,
        })),
    ))
}

/// `GET /photos/{photo_id}/{size}`: download one stored size.
pub async fn get_photo_content(
    State(state): State<AppState>,
    Path((photo_id, size_name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let owner = current_owner(&state, &headers).await?;
    let spec = size::find(&size_name)
        .ok_or_else(|| AppError::not_found(format!("unknown size `{}`", size_name)))?;
    let photo = owned_photo(&state, &owner, &photo_id).await?;

    if !photo.has_size(spec) {
        return Err(AppError::not_found(format!(
            "photo `{}` has no {} size yet",
            photo_id, spec.name
        )));
    }

    let stored = state.content.get(&photo_id, spec).await?.ok_or_else(|| {
        warn!("photo {} size {} recorded but missing", photo_id, spec.name);
        AppError::not_found(format!("content for `{}` missing", photo_id))
    })?;

    let content_type = stored.content_type.unwrap_or(photo.mime_type);
    let mut response = Response::new(Body::from(stored.data));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    Ok(response)
}

/// `DELETE /photos/{photo_id}`: remove all content, then the metadata.
pub async fn delete_photo(
    State(state): State<AppState>,
    Path(photo_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let owner = current_owner(&state, &headers).await?;
    owned_photo(&state, &owner, &photo_id).await?;

    state.content.delete(&photo_id).await?;
    state.metadata.delete(&photo_id).await?;
    info!("deleted photo {}", photo_id);
    Ok(StatusCode::NO_CONTENT)
}
