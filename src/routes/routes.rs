//! Defines routes for the Harbor gateway.
//!
//! ## Structure
//! - **Health**: `GET /healthz`, `GET /readyz`
//! - **Buckets**
//!   - `GET    /api/v1/buckets`: list the caller's buckets (`offset`, `limit`)
//!   - `POST   /api/v1/buckets`: create bucket
//!   - `GET    /api/v1/buckets/{id}`: bucket details
//!   - `PATCH  /api/v1/buckets/{id}`: `?public=` or `?rename=`
//!   - `DELETE /api/v1/buckets/{id}`: soft delete
//! - **Directories**
//!   - `GET    /api/v1/dir/{bucket}[/{*path}]`: list children
//!   - `POST   /api/v1/dir/{bucket}/{*path}`: create directory
//!   - `DELETE /api/v1/dir/{bucket}/{*path}`: delete empty directory
//! - **Objects**
//!   - `GET    /api/v1/obj/{bucket}/{*path}`: owner read (`offset`, `size`)
//!   - `POST   /api/v1/obj/{bucket}/{*path}`: multipart chunk upload
//!   - `PATCH  /api/v1/obj/{bucket}/{*path}`: share (`share`, `days`)
//!   - `DELETE /api/v1/obj/{bucket}/{*path}`: delete
//!   - `GET    /api/v1/metadata/{bucket}/{*path}`: node metadata
//!   - `POST   /api/v1/move/{bucket}/{*path}`: move/rename (`move_to`, `rename`)
//! - **Download**: `GET /obs/{bucket}/{*path}` with `Range` support
//!
//! The wildcard `*path` allows nested paths like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        bucket_handlers::{create_bucket, delete_bucket, get_bucket, list_buckets, update_bucket},
        dir_handlers::{create_dir, delete_dir, list_dir},
        download_handlers::download_object,
        health_handlers::{healthz, readyz},
        object_handlers::{
            delete_object, move_object, object_metadata, read_chunk, share_object, upload_chunk,
        },
    },
    services::harbor_service::HarborService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Largest multipart request accepted for one chunk upload.
pub const MAX_UPLOAD_BODY: usize = 256 * 1024 * 1024;

/// Build and return the router for every Harbor endpoint.
///
/// The router carries shared state (`HarborService`) to all handlers.
pub fn routes() -> Router<HarborService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Buckets
        .route("/api/v1/buckets", get(list_buckets).post(create_bucket))
        .route(
            "/api/v1/buckets/{id}",
            get(get_bucket).patch(update_bucket).delete(delete_bucket),
        )
        // Directories
        .route("/api/v1/dir/{bucket}", get(list_dir))
        .route(
            "/api/v1/dir/{bucket}/{*path}",
            get(list_dir).post(create_dir).delete(delete_dir),
        )
        // Objects
        .route(
            "/api/v1/obj/{bucket}/{*path}",
            get(read_chunk)
                .post(upload_chunk)
                .patch(share_object)
                .delete(delete_object)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BODY)),
        )
        .route("/api/v1/metadata/{bucket}/{*path}", get(object_metadata))
        .route("/api/v1/move/{bucket}/{*path}", post(move_object))
        // Download
        .route("/obs/{bucket}/{*path}", get(download_object))
}
