//! HTTP handlers for directories inside a bucket.

use crate::{
    errors::AppError,
    handlers::{
        auth::RequireUser,
        paging::{PageParams, PagedResponse},
    },
    models::object::HarborObject,
    services::{harbor_service::HarborService, object_tree::clear_path},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, Uri},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

/// `{bucket}` with an optional `{*path}`; a missing path is the bucket root.
#[derive(Debug, Deserialize)]
pub struct DirPath {
    pub bucket: String,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct DirListing {
    pub bucket_name: String,
    pub dir_path: String,
    #[serde(flatten)]
    pub page: PagedResponse<HarborObject>,
}

/// GET `/api/v1/dir/{bucket}[/{*path}]`: children of a directory.
pub async fn list_dir(
    State(service): State<HarborService>,
    RequireUser(user): RequireUser,
    Path(dir): Path<DirPath>,
    Query(params): Query<PageParams>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<DirListing>, AppError> {
    let paginator = service.paginator(params.offset, params.limit)?;
    let page = service
        .list_dir(&user, &dir.bucket, &dir.path, paginator)
        .await?;
    Ok(Json(DirListing {
        dir_path: clear_path(&dir.path).to_string(),
        bucket_name: dir.bucket,
        page: PagedResponse::new(page, &uri, &headers),
    }))
}

/// POST `/api/v1/dir/{bucket}/{*path}`: create one directory. The parent
/// must already exist.
pub async fn create_dir(
    State(service): State<HarborService>,
    RequireUser(user): RequireUser,
    Path(dir): Path<DirPath>,
) -> Result<impl IntoResponse, AppError> {
    let node = service.create_dir(&user, &dir.bucket, &dir.path).await?;
    Ok((StatusCode::CREATED, Json(node)))
}

/// DELETE `/api/v1/dir/{bucket}/{*path}`: only empty directories.
pub async fn delete_dir(
    State(service): State<HarborService>,
    RequireUser(user): RequireUser,
    Path(dir): Path<DirPath>,
) -> Result<StatusCode, AppError> {
    service.delete_dir(&user, &dir.bucket, &dir.path).await?;
    Ok(StatusCode::NO_CONTENT)
}
