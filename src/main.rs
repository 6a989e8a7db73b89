use anyhow::{Context, Result};
use axum::Router;
use services::harbor_service::{HarborService, ServiceSettings};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod storage;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting harbor-store with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);

    // --- Handle migration mode ---
    if migrate {
        db::migrate(&db).await.context("running migrations")?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }
    db::migrate(&db).await.context("running migrations")?;

    // --- Initialize blob backend + core service ---
    let store = storage::from_config(&cfg)
        .await
        .with_context(|| format!("initializing {} backend", cfg.backend))?;
    let service = HarborService::new(db.clone(), store, ServiceSettings::from_config(&cfg));

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
