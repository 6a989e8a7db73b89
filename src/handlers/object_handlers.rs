//! HTTP handlers for file objects: chunked upload, owner reads, sharing,
//! metadata, move/rename and deletion.

use crate::{
    errors::AppError,
    handlers::{auth::RequireUser, download_handlers::OBJ_SIZE_HEADER},
    models::object::HarborObject,
    services::{
        harbor_service::{ChunkUpload, HarborService},
        object_tree::clear_path,
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State, multipart::Field},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    pub reset: bool,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub chunk_offset: u64,
    pub chunk_size: u64,
    pub object: HarborObject,
}

#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    #[serde(default)]
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Deserialize)]
pub struct ShareQuery {
    pub share: bool,
    /// 0 shares without a time limit.
    #[serde(default)]
    pub days: i64,
}

#[derive(Debug, Serialize)]
pub struct ShareResponse {
    pub share: bool,
    pub without_time_limit: bool,
    pub share_start: Option<DateTime<Utc>>,
    pub share_end: Option<DateTime<Utc>>,
    pub download_url: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveQuery {
    pub move_to: Option<String>,
    pub rename: Option<String>,
}

async fn field_u64(field: Field<'_>, name: &str) -> Result<u64, AppError> {
    let text = field
        .text()
        .await
        .map_err(|err| AppError::bad_request(format!("reading `{name}`: {err}")))?;
    text.trim()
        .parse::<u64>()
        .map_err(|_| AppError::bad_request(format!("`{name}` must be a non-negative integer")))
}

/// POST `/api/v1/obj/{bucket}/{*path}`: multipart fields `chunk`,
/// `chunk_offset` and `chunk_size`; `?reset=true` discards existing bytes
/// first.
pub async fn upload_chunk(
    State(service): State<HarborService>,
    RequireUser(user): RequireUser,
    Path((bucket, path)): Path<(String, String)>,
    Query(q): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut data: Option<Bytes> = None;
    let mut chunk_offset = None;
    let mut chunk_size = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "chunk" => {
                data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|err| AppError::bad_request(err.to_string()))?,
                )
            }
            "chunk_offset" => chunk_offset = Some(field_u64(field, "chunk_offset").await?),
            "chunk_size" => chunk_size = Some(field_u64(field, "chunk_size").await?),
            other => debug!("ignoring multipart field `{other}`"),
        }
    }

    let data = data.ok_or_else(|| AppError::bad_request("missing `chunk` field"))?;
    let chunk_offset =
        chunk_offset.ok_or_else(|| AppError::bad_request("missing `chunk_offset` field"))?;
    let chunk_size =
        chunk_size.ok_or_else(|| AppError::bad_request("missing `chunk_size` field"))?;

    let object = service
        .upload_chunk(
            &user,
            &bucket,
            &path,
            ChunkUpload {
                offset: chunk_offset,
                size: chunk_size,
                data,
                reset: q.reset,
            },
        )
        .await?;

    Ok(Json(UploadResponse {
        chunk_offset,
        chunk_size,
        object,
    }))
}

/// GET `/api/v1/obj/{bucket}/{*path}?offset=&size=`: owner read of at most
/// 20 MiB. The total object size is returned in a response header.
pub async fn read_chunk(
    State(service): State<HarborService>,
    RequireUser(user): RequireUser,
    Path((bucket, path)): Path<(String, String)>,
    Query(q): Query<ReadQuery>,
) -> Result<Response, AppError> {
    let (data, total) = service
        .read_chunk(&user, &bucket, &path, q.offset, q.size)
        .await?;

    let mut response = Response::new(Body::from(data));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(OBJ_SIZE_HEADER, HeaderValue::from(total));
    *response.status_mut() = StatusCode::OK;
    Ok(response)
}

/// PATCH `/api/v1/obj/{bucket}/{*path}?share=true&days=N`
pub async fn share_object(
    State(service): State<HarborService>,
    RequireUser(user): RequireUser,
    Path((bucket, path)): Path<(String, String)>,
    Query(q): Query<ShareQuery>,
) -> Result<Json<ShareResponse>, AppError> {
    let node = service
        .share_object(&user, &bucket, &path, q.share, q.days)
        .await?;
    Ok(Json(ShareResponse {
        share: node.shared,
        without_time_limit: node.shared_without_time_limit,
        share_start: node.share_start,
        share_end: node.share_end,
        download_url: format!("/obs/{}/{}", bucket, clear_path(&node.path_name)),
    }))
}

/// DELETE `/api/v1/obj/{bucket}/{*path}`
pub async fn delete_object(
    State(service): State<HarborService>,
    RequireUser(user): RequireUser,
    Path((bucket, path)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    service.delete_object(&user, &bucket, &path).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/api/v1/metadata/{bucket}/{*path}`: file or directory.
pub async fn object_metadata(
    State(service): State<HarborService>,
    RequireUser(user): RequireUser,
    Path((bucket, path)): Path<(String, String)>,
) -> Result<Json<HarborObject>, AppError> {
    Ok(Json(service.metadata(&user, &bucket, &path).await?))
}

/// POST `/api/v1/move/{bucket}/{*path}?move_to=&rename=`
pub async fn move_object(
    State(service): State<HarborService>,
    RequireUser(user): RequireUser,
    Path((bucket, path)): Path<(String, String)>,
    Query(q): Query<MoveQuery>,
) -> Result<impl IntoResponse, AppError> {
    let node = service
        .move_object(
            &user,
            &bucket,
            &path,
            q.move_to.as_deref(),
            q.rename.as_deref(),
        )
        .await?;
    Ok(Json(node))
}
