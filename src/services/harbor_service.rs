//! HarborService: the request-facing coordinator.
//!
//! Resolves buckets and tree nodes in SQLite and moves bytes through the
//! configured [`BlobStore`]. Chunk uploads and deletions keep metadata and
//! blob bytes consistent by gating the transaction commit on the backend
//! call.

use crate::{
    config::{AppConfig, DEFAULT_OPTIMIZE_THRESHOLD, DEFAULT_PAGE_LIMIT},
    errors::{HarborError, HarborResult},
    models::{bucket::Bucket, object::HarborObject, user::AuthUser},
    services::{
        bucket_manager,
        object_tree::{ObjectTree, clear_path},
        pagination::{Page, Paginator, SqlSource},
        range::{ByteRange, parse_range_header},
    },
    storage::{BlobStore, DEFAULT_STREAM_STEP, StorageResult, blob_key},
};
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use sqlx::{Connection, Sqlite, SqliteConnection, SqlitePool, pool::PoolConnection};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Largest span an owner may read in one `read_chunk` call.
pub const MAX_READ_CHUNK: u64 = 20 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub stream_step: u64,
    pub optimize_threshold: i64,
    pub default_page_limit: i64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            stream_step: DEFAULT_STREAM_STEP,
            optimize_threshold: DEFAULT_OPTIMIZE_THRESHOLD,
            default_page_limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl ServiceSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            stream_step: cfg.stream_step,
            optimize_threshold: cfg.optimize_threshold,
            default_page_limit: cfg.default_page_limit,
        }
    }
}

/// One chunk of a file upload.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub offset: u64,
    /// Declared length; must equal `data.len()`.
    pub size: u64,
    pub data: Bytes,
    /// Discard the existing bytes and recorded size before writing.
    pub reset: bool,
}

/// A download ready to be turned into a response.
pub struct Download {
    pub object: HarborObject,
    /// `None` for a full download.
    pub range: Option<ByteRange>,
    pub total: u64,
    pub body: BoxStream<'static, StorageResult<Bytes>>,
}

impl Download {
    pub fn content_length(&self) -> u64 {
        match self.range {
            Some(range) => range.len(),
            None => self.total,
        }
    }
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct HarborService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,
    /// Blob backend selected at startup.
    pub store: Arc<dyn BlobStore>,
    pub settings: ServiceSettings,
}

fn object_size(node: &HarborObject) -> u64 {
    u64::try_from(node.size).unwrap_or(0)
}

impl HarborService {
    pub fn new(db: Arc<SqlitePool>, store: Arc<dyn BlobStore>, settings: ServiceSettings) -> Self {
        Self {
            db,
            store,
            settings,
        }
    }

    async fn acquire(&self) -> HarborResult<PoolConnection<Sqlite>> {
        Ok(self.db.acquire().await?)
    }

    /// Paginator for one request. `limit` falls back to the configured default.
    pub fn paginator(&self, offset: Option<i64>, limit: Option<i64>) -> HarborResult<Paginator> {
        Ok(Paginator::new(
            limit.unwrap_or(self.settings.default_page_limit),
            offset.unwrap_or(0),
        )?
        .optimized(self.settings.optimize_threshold))
    }

    async fn owned_bucket(
        conn: &mut SqliteConnection,
        owner: &AuthUser,
        name: &str,
    ) -> HarborResult<Bucket> {
        bucket_manager::get_user_bucket(conn, owner, name)
            .await?
            .ok_or_else(|| HarborError::not_found(format!("bucket `{name}`")))
    }

    // ---- buckets -------------------------------------------------------

    pub async fn create_bucket(&self, owner: &AuthUser, name: &str) -> HarborResult<Bucket> {
        let mut conn = self.acquire().await?;
        bucket_manager::create_bucket(&mut conn, owner, name).await
    }

    pub async fn get_bucket(&self, owner: &AuthUser, id: i64) -> HarborResult<Bucket> {
        let mut conn = self.acquire().await?;
        bucket_manager::get_user_bucket_by_id(&mut conn, owner, id)
            .await?
            .ok_or_else(|| HarborError::not_found(format!("bucket {id}")))
    }

    pub async fn list_buckets(
        &self,
        owner: &AuthUser,
        paginator: Paginator,
    ) -> HarborResult<Page<Bucket>> {
        let mut conn = self.acquire().await?;
        let query = bucket_manager::list_user_buckets(owner);
        paginator
            .paginate(&mut SqlSource::<Bucket>::new(&mut conn, query))
            .await
    }

    pub async fn delete_buckets(&self, owner: &AuthUser, ids: &[i64]) -> HarborResult<u64> {
        let mut conn = self.acquire().await?;
        bucket_manager::soft_delete_user_buckets(&mut conn, owner, ids).await
    }

    pub async fn set_buckets_access(
        &self,
        owner: &AuthUser,
        ids: &[i64],
        public: bool,
    ) -> HarborResult<u64> {
        let mut conn = self.acquire().await?;
        bucket_manager::set_user_buckets_access(&mut conn, owner, ids, public).await
    }

    pub async fn rename_bucket(
        &self,
        owner: &AuthUser,
        id: i64,
        new_name: &str,
    ) -> HarborResult<Bucket> {
        let mut conn = self.acquire().await?;
        bucket_manager::rename_bucket(&mut conn, owner, id, new_name).await
    }

    // ---- directories ---------------------------------------------------

    pub async fn create_dir(
        &self,
        owner: &AuthUser,
        bucket: &str,
        path: &str,
    ) -> HarborResult<HarborObject> {
        if clear_path(path).is_empty() {
            return Err(HarborError::invalid("directory path must not be empty"));
        }
        let mut conn = self.acquire().await?;
        let bucket = Self::owned_bucket(&mut conn, owner, bucket).await?;
        let dir = ObjectTree::for_bucket(&bucket)
            .create_directory(&mut conn, path)
            .await?;
        debug!("created directory {} in bucket {}", dir.path_name, bucket.name);
        Ok(dir)
    }

    pub async fn list_dir(
        &self,
        owner: &AuthUser,
        bucket: &str,
        path: &str,
        paginator: Paginator,
    ) -> HarborResult<Page<HarborObject>> {
        let mut conn = self.acquire().await?;
        let bucket = Self::owned_bucket(&mut conn, owner, bucket).await?;
        let query = ObjectTree::for_bucket(&bucket)
            .list_children(&mut conn, path)
            .await?;
        paginator
            .paginate(&mut SqlSource::<HarborObject>::new(&mut conn, query))
            .await
    }

    pub async fn delete_dir(&self, owner: &AuthUser, bucket: &str, path: &str) -> HarborResult<()> {
        let mut conn = self.acquire().await?;
        let bucket = Self::owned_bucket(&mut conn, owner, bucket).await?;
        let tree = ObjectTree::for_bucket(&bucket);
        let dir = tree.resolve_directory(&mut conn, path).await?;
        tree.delete_empty_directory(&mut conn, &dir).await
    }

    /// The file or directory at `path`.
    pub async fn metadata(
        &self,
        owner: &AuthUser,
        bucket: &str,
        path: &str,
    ) -> HarborResult<HarborObject> {
        let mut conn = self.acquire().await?;
        let bucket = Self::owned_bucket(&mut conn, owner, bucket).await?;
        ObjectTree::for_bucket(&bucket)
            .resolve_node(&mut conn, path)
            .await
    }

    /// Move the node at `path` under `move_to`, or rename it in place when
    /// only `rename` is given.
    pub async fn move_object(
        &self,
        owner: &AuthUser,
        bucket: &str,
        path: &str,
        move_to: Option<&str>,
        rename: Option<&str>,
    ) -> HarborResult<HarborObject> {
        let mut conn = self.acquire().await?;
        let bucket = Self::owned_bucket(&mut conn, owner, bucket).await?;
        let tree = ObjectTree::for_bucket(&bucket);
        let mut node = tree.resolve_node(&mut conn, path).await?;
        match (move_to, rename) {
            (Some(dest), new_name) => {
                tree.move_node(&mut conn, &mut node, dest, new_name).await?
            }
            (None, Some(new_name)) => tree.rename(&mut conn, &mut node, new_name).await?,
            (None, None) => {
                return Err(HarborError::invalid(
                    "either `move_to` or `rename` is required",
                ));
            }
        }
        Ok(node)
    }

    // ---- objects -------------------------------------------------------

    /// Write one chunk of the file at `path`, creating the file if needed.
    ///
    /// The recorded size becomes `max(size, offset + len)`. The size update
    /// only commits once the backend write has succeeded.
    pub async fn upload_chunk(
        &self,
        owner: &AuthUser,
        bucket: &str,
        path: &str,
        chunk: ChunkUpload,
    ) -> HarborResult<HarborObject> {
        if chunk.size != chunk.data.len() as u64 {
            return Err(HarborError::invalid(format!(
                "chunk_size {} does not match the {} bytes received",
                chunk.size,
                chunk.data.len()
            )));
        }
        let end = chunk
            .offset
            .checked_add(chunk.size)
            .and_then(|end| i64::try_from(end).ok())
            .ok_or_else(|| HarborError::invalid("chunk offset is out of range"))?;

        let mut conn = self.acquire().await?;
        let bucket = Self::owned_bucket(&mut conn, owner, bucket).await?;
        let tree = ObjectTree::for_bucket(&bucket);

        if chunk.reset {
            if let Some(existing) = tree.find_file(&mut conn, path).await? {
                self.reset_object(&mut conn, &bucket, &tree, &existing)
                    .await?;
            }
        }

        let mut tx = conn.begin().await?;
        let (mut node, created) = tree.create_or_fetch_file(&mut *tx, path).await?;
        node.grow_size(end);
        node.touch();
        tree.save(&mut *tx, &node).await?;

        let key = blob_key(bucket.id, node.id);
        debug!(
            "writing {} bytes at {} to {} (new file: {})",
            chunk.size, chunk.offset, key, created
        );
        if let Err(err) = self.store.write(&key, chunk.offset, &chunk.data).await {
            warn!("backend write to {key} failed, rolling back metadata: {err}");
            if let Err(rollback) = tx.rollback().await {
                warn!("rollback after failed write to {key} failed: {rollback}");
            }
            return Err(err.into());
        }
        tx.commit().await?;
        Ok(node)
    }

    /// Zero the recorded size and drop the blob. Runs in its own transaction
    /// ahead of the chunk write.
    async fn reset_object(
        &self,
        conn: &mut SqliteConnection,
        bucket: &Bucket,
        tree: &ObjectTree,
        node: &HarborObject,
    ) -> HarborResult<()> {
        let key = blob_key(bucket.id, node.id);
        let mut tx = conn.begin().await?;
        tree.set_size(&mut *tx, node.id, 0).await?;
        if let Err(err) = self.store.delete(&key, object_size(node)).await {
            warn!("reset of {key} failed, keeping recorded size: {err}");
            if let Err(rollback) = tx.rollback().await {
                warn!("rollback after failed reset of {key} failed: {rollback}");
            }
            return Err(err.into());
        }
        tx.commit().await?;
        info!("reset {} in bucket {}", node.path_name, bucket.name);
        Ok(())
    }

    /// Owner read of up to `size` bytes at `offset`. Returns the bytes and
    /// the file's total size.
    pub async fn read_chunk(
        &self,
        owner: &AuthUser,
        bucket: &str,
        path: &str,
        offset: u64,
        size: u64,
    ) -> HarborResult<(Bytes, u64)> {
        if size > MAX_READ_CHUNK {
            return Err(HarborError::invalid(format!(
                "size must not exceed {MAX_READ_CHUNK} bytes"
            )));
        }
        let mut conn = self.acquire().await?;
        let bucket = Self::owned_bucket(&mut conn, owner, bucket).await?;
        let node = ObjectTree::for_bucket(&bucket)
            .resolve_file(&mut conn, path)
            .await?;
        let total = object_size(&node);
        if offset >= total || size == 0 {
            return Ok((Bytes::new(), total));
        }
        let want = size.min(total - offset);
        let data = self
            .store
            .read(&blob_key(bucket.id, node.id), offset, want)
            .await?;
        Ok((data, total))
    }

    /// Delete the file row and its blob. The row deletion only commits once
    /// the blob is gone.
    pub async fn delete_object(&self, owner: &AuthUser, bucket: &str, path: &str) -> HarborResult<()> {
        let mut conn = self.acquire().await?;
        let bucket = Self::owned_bucket(&mut conn, owner, bucket).await?;
        let tree = ObjectTree::for_bucket(&bucket);
        let node = tree.resolve_file(&mut conn, path).await?;
        let key = blob_key(bucket.id, node.id);

        let mut tx = conn.begin().await?;
        tree.delete_file(&mut *tx, &node).await?;
        if let Err(err) = self.store.delete(&key, object_size(&node)).await {
            warn!("deleting blob {key} failed, keeping metadata: {err}");
            if let Err(rollback) = tx.rollback().await {
                warn!("rollback after failed delete of {key} failed: {rollback}");
            }
            return Err(err.into());
        }
        tx.commit().await?;
        debug!("deleted {} from bucket {}", node.path_name, bucket.name);
        Ok(())
    }

    /// Share or unshare a file. See [`HarborObject::set_shared`] for `days`.
    pub async fn share_object(
        &self,
        owner: &AuthUser,
        bucket: &str,
        path: &str,
        share: bool,
        days: i64,
    ) -> HarborResult<HarborObject> {
        let mut conn = self.acquire().await?;
        let bucket = Self::owned_bucket(&mut conn, owner, bucket).await?;
        let tree = ObjectTree::for_bucket(&bucket);
        let mut node = tree.resolve_file(&mut conn, path).await?;
        node.set_shared(share, days, Utc::now());
        tree.save(&mut conn, &node).await?;
        Ok(node)
    }

    /// Authorize and prepare a download of the file at `path`.
    ///
    /// Allowed when the bucket is public, `user` owns it, or the file is
    /// shared and inside its share window. A full download or a range that
    /// starts at byte 0 counts as one download.
    pub async fn download(
        &self,
        user: Option<&AuthUser>,
        bucket: &str,
        path: &str,
        range_header: Option<&str>,
    ) -> HarborResult<Download> {
        let mut conn = self.acquire().await?;
        let bucket = bucket_manager::get_bucket_by_name(&mut conn, bucket)
            .await?
            .ok_or_else(|| HarborError::not_found(format!("bucket `{bucket}`")))?;
        let tree = ObjectTree::for_bucket(&bucket);
        let object = tree.resolve_file(&mut conn, path).await?;

        let allowed = bucket.is_public()
            || bucket.is_owned_by(user)
            || object.is_shared_and_in_window(Utc::now());
        if !allowed {
            return Err(HarborError::PermissionDenied(format!(
                "no access to `{}`",
                object.path_name
            )));
        }

        let total = object_size(&object);
        let range = range_header
            .map(|header| parse_range_header(header, total))
            .transpose()?;
        let body = match range {
            _ if total == 0 => stream::empty().boxed(),
            Some(range) => self.store.clone().stream_range(
                blob_key(bucket.id, object.id),
                range.start,
                range.end,
                self.settings.stream_step,
            ),
            None => self.store.clone().stream_range(
                blob_key(bucket.id, object.id),
                0,
                total - 1,
                self.settings.stream_step,
            ),
        };

        if range.is_none_or(|r| r.start == 0) {
            tree.increase_download_count(&mut conn, object.id).await?;
        }
        Ok(Download {
            object,
            range,
            total,
            body,
        })
    }
}
