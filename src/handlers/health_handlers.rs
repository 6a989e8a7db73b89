//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks SQLite and the blob backend

use crate::services::harbor_service::HarborService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Cheap liveness probe. Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 1. Runs `SELECT 1` against SQLite.
/// 2. Asks the blob backend for a round trip (`BlobStore::probe`).
///
/// HTTP 200 when both checks pass, 503 otherwise.
pub async fn readyz(State(service): State<HarborService>) -> impl IntoResponse {
    let sqlite_check = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*service.db)
        .await
    {
        Ok(1) => CheckStatus::ok(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {v}")),
        Err(e) => CheckStatus::failed(format!("error: {e}")),
    };

    let storage_check = match service.store.probe().await {
        Ok(()) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(format!("{} backend: {e}", service.store.kind())),
    };

    let overall_ok = sqlite_check.ok && storage_check.ok;
    let mut checks = HashMap::new();
    checks.insert("sqlite", sqlite_check);
    checks.insert("storage", storage_check);

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        backend: service.store.kind(),
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    backend: &'static str,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ClusterSettings,
        db::test_support::scratch_db,
        services::harbor_service::ServiceSettings,
        storage::{cluster::ClusterStore, local::LocalDiskStore, pool::FsClusterConnector},
    };
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn ready_with_local_backend() {
        let (_db_dir, pool) = scratch_db().await;
        let upload = TempDir::new().unwrap();
        let store = LocalDiskStore::new(upload.path()).await.unwrap();
        let service = HarborService::new(Arc::new(pool), Arc::new(store), ServiceSettings::default());

        let response = readyz(State(service)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unreachable_cluster_is_not_ready() {
        let (db_dir, pool) = scratch_db().await;
        let connector = FsClusterConnector::new(ClusterSettings {
            cluster_name: "ceph".into(),
            user: "client.admin".into(),
            conf_file: db_dir.path().join("missing.conf"),
            keyring_file: db_dir.path().join("missing.keyring"),
            pool_name: "harbor".into(),
            pool_root: db_dir.path().join("pools"),
            unit_size: 1024,
        });
        let store = ClusterStore::new(Arc::new(connector), 1024);
        let service = HarborService::new(Arc::new(pool), Arc::new(store), ServiceSettings::default());

        let response = readyz(State(service)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
