//! HTTP handlers for bucket management. Every route requires a caller.

use crate::{
    errors::AppError,
    handlers::{
        auth::RequireUser,
        paging::{PageParams, PagedResponse},
    },
    models::bucket::Bucket,
    services::harbor_service::HarborService,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, Uri},
    response::IntoResponse,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CreateBucketReq {
    pub name: String,
}

/// `PATCH /api/v1/buckets/{id}` takes exactly one of these.
#[derive(Debug, Deserialize)]
pub struct UpdateBucketQuery {
    pub public: Option<bool>,
    pub rename: Option<String>,
}

/// GET `/api/v1/buckets`: the caller's live buckets, newest first.
pub async fn list_buckets(
    State(service): State<HarborService>,
    RequireUser(user): RequireUser,
    Query(params): Query<PageParams>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<PagedResponse<Bucket>>, AppError> {
    let paginator = service.paginator(params.offset, params.limit)?;
    let page = service.list_buckets(&user, paginator).await?;
    Ok(Json(PagedResponse::new(page, &uri, &headers)))
}

/// POST `/api/v1/buckets`: create a private bucket.
pub async fn create_bucket(
    State(service): State<HarborService>,
    RequireUser(user): RequireUser,
    Json(req): Json<CreateBucketReq>,
) -> Result<impl IntoResponse, AppError> {
    let bucket = service.create_bucket(&user, &req.name).await?;
    Ok((StatusCode::CREATED, Json(bucket)))
}

pub async fn get_bucket(
    State(service): State<HarborService>,
    RequireUser(user): RequireUser,
    Path(id): Path<i64>,
) -> Result<Json<Bucket>, AppError> {
    Ok(Json(service.get_bucket(&user, id).await?))
}

/// DELETE `/api/v1/buckets/{id}`: soft delete.
pub async fn delete_bucket(
    State(service): State<HarborService>,
    RequireUser(user): RequireUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    if service.delete_buckets(&user, &[id]).await? == 0 {
        return Err(AppError::new(
            StatusCode::NOT_FOUND,
            format!("bucket {id} not found"),
        ));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH `/api/v1/buckets/{id}?public=true|false` or `?rename=new-name`.
pub async fn update_bucket(
    State(service): State<HarborService>,
    RequireUser(user): RequireUser,
    Path(id): Path<i64>,
    Query(q): Query<UpdateBucketQuery>,
) -> Result<Json<Bucket>, AppError> {
    match (q.public, q.rename) {
        (Some(public), None) => {
            if service.set_buckets_access(&user, &[id], public).await? == 0 {
                return Err(AppError::new(
                    StatusCode::NOT_FOUND,
                    format!("bucket {id} not found"),
                ));
            }
            Ok(Json(service.get_bucket(&user, id).await?))
        }
        (None, Some(name)) => Ok(Json(service.rename_bucket(&user, id, &name).await?)),
        _ => Err(AppError::bad_request(
            "exactly one of `public` or `rename` is required",
        )),
    }
}
