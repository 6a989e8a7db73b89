//! SQLite plumbing: connecting, schema migration and per-bucket object tables.

use anyhow::{Context, Result};
use sqlx::{
    SqliteConnection, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr};
use tracing::{debug, info};

const INIT_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Name of the object table that belongs to bucket `bucket_id`.
pub fn objects_table_name(bucket_id: i64) -> String {
    format!("bucket_{bucket_id}")
}

/// Open a pool for `database_url`, creating the SQLite file and its parent
/// directory when missing.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    let db_path = db_path.split('?').next().unwrap_or(db_path);
    debug!("Interpreted SQLite path => {}", db_path);

    if db_path != ":memory:" {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating database directory {parent:?}"))?;
                info!("Created missing directory {:?}", parent);
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing database url `{database_url}`"))?
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {database_url}"))
}

/// Apply the embedded schema. Safe to run repeatedly.
pub async fn migrate(db: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = INIT_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

/// Create the object table for a new bucket.
///
/// `(parent_id, name)` is unique, which is what turns the flat table into a
/// tree: one name per directory, shared by files and sub-directories alike.
pub async fn create_objects_table(
    conn: &mut SqliteConnection,
    bucket_id: i64,
) -> Result<(), sqlx::Error> {
    let table = objects_table_name(bucket_id);
    let create = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id                        INTEGER PRIMARY KEY AUTOINCREMENT,
            path_name                 TEXT    NOT NULL,
            is_file                   BOOLEAN NOT NULL,
            parent_id                 INTEGER NOT NULL DEFAULT 0,
            name                      TEXT    NOT NULL,
            size                      INTEGER NOT NULL DEFAULT 0,
            upload_time               TEXT    NOT NULL,
            update_time               TEXT    NOT NULL,
            download_count            INTEGER NOT NULL DEFAULT 0,
            shared                    BOOLEAN NOT NULL DEFAULT 0,
            shared_without_time_limit BOOLEAN NOT NULL DEFAULT 0,
            share_start               TEXT,
            share_end                 TEXT,
            soft_deleted              BOOLEAN NOT NULL DEFAULT 0,
            UNIQUE (parent_id, name)
        )
        "#
    );
    let index = format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_file_parent ON {table} (is_file, parent_id)"
    );
    debug!("creating object table {}", table);
    sqlx::query(&create).execute(&mut *conn).await?;
    sqlx::query(&index).execute(&mut *conn).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    /// File-backed database in a scratch directory, migrated and ready.
    pub async fn scratch_db() -> (TempDir, SqlitePool) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("meta/harbor.db").display());
        let pool = connect(&url).await.unwrap();
        migrate(&pool).await.unwrap();
        (dir, pool)
    }
}
