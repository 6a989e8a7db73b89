//! Blob storage backends.
//!
//! A blob is the raw byte payload of one file object. Metadata lives in SQLite;
//! the bytes live in whichever [`BlobStore`] the deployment selects:
//!
//! - [`local::LocalDiskStore`]: one file per blob under the upload directory.
//! - [`cluster::ClusterStore`]: blobs split into size-limited parts on a
//!   storage cluster pool.
//!
//! Every backend is addressed by offset, so chunked uploads can land in any
//! order, and every backend can stream an inclusive byte range in bounded
//! steps for download responses.

pub mod cluster;
pub mod local;
pub mod pool;

use crate::config::{AppConfig, BackendKind};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::{io, sync::Arc};
use thiserror::Error;

/// Bytes produced per step when streaming a blob.
pub const DEFAULT_STREAM_STEP: u64 = 5 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("transfer of {len} bytes exceeds the per-unit limit of {limit} bytes")]
    PartTooLarge { len: u64, limit: u64 },
    #[error("write to unit `{unit}` at {offset}+{len} exceeds the unit size of {limit} bytes")]
    UnitOverflow {
        unit: String,
        offset: u64,
        len: u64,
        limit: u64,
    },
    #[error("cluster connection failed: {0}")]
    Connection(String),
    #[error("invalid blob key `{0}`")]
    InvalidKey(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Storage key of the blob that belongs to `object_id` in bucket `bucket_id`.
pub fn blob_key(bucket_id: i64, object_id: i64) -> String {
    format!("{bucket_id}_{object_id}")
}

/// Offset-addressed byte storage.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Short backend name used in logs and readiness output.
    fn kind(&self) -> &'static str;

    /// Write `data` at `offset`, creating the blob if needed. Bytes outside
    /// the written span are left untouched.
    async fn write(&self, key: &str, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Read up to `len` bytes starting at `offset`. The result is shorter only
    /// at end-of-blob; reading at or past the end yields an empty buffer.
    async fn read(&self, key: &str, offset: u64, len: u64) -> StorageResult<Bytes>;

    /// Current byte length of the blob, 0 if it does not exist.
    async fn size(&self, key: &str) -> StorageResult<u64>;

    /// Remove the blob. Removing a missing blob succeeds. `recorded_size` is the
    /// size the metadata layer knows about; backends that split blobs use it to
    /// enumerate parts.
    async fn delete(&self, key: &str, recorded_size: u64) -> StorageResult<()>;

    /// Cheap round trip used by the readiness probe.
    async fn probe(&self) -> StorageResult<()>;

    /// Lazily stream `[start, end_inclusive]` in chunks of at most `step` bytes.
    ///
    /// The stream ends early if the blob is shorter than requested. It is not
    /// restartable.
    fn stream_range(
        self: Arc<Self>,
        key: String,
        start: u64,
        end_inclusive: u64,
        step: u64,
    ) -> BoxStream<'static, StorageResult<Bytes>> {
        stepped_reads(self, key, start, end_inclusive, step)
    }
}

/// Range stream built from repeated [`BlobStore::read`] calls.
pub fn stepped_reads<S>(
    store: Arc<S>,
    key: String,
    start: u64,
    end_inclusive: u64,
    step: u64,
) -> BoxStream<'static, StorageResult<Bytes>>
where
    S: BlobStore + ?Sized,
{
    let step = step.max(1);
    stream::try_unfold(
        (store, key, start),
        move |(store, key, offset)| async move {
            if offset > end_inclusive {
                return Ok(None);
            }
            let want = (end_inclusive - offset + 1).min(step);
            let chunk = store.read(&key, offset, want).await?;
            if chunk.is_empty() {
                return Ok(None);
            }
            let next = offset + chunk.len() as u64;
            Ok(Some((chunk, (store, key, next))))
        },
    )
    .boxed()
}

/// Build the backend selected by `cfg`.
pub async fn from_config(cfg: &AppConfig) -> StorageResult<Arc<dyn BlobStore>> {
    match cfg.backend {
        BackendKind::Local => {
            let store = local::LocalDiskStore::new(&cfg.upload_dir).await?;
            tracing::info!("Using local disk backend at {}", cfg.upload_dir);
            Ok(Arc::new(store))
        }
        BackendKind::Cluster => {
            let connector = pool::FsClusterConnector::new(cfg.cluster.clone());
            tracing::info!(
                "Using cluster backend (cluster={}, pool={}, unit_size={})",
                cfg.cluster.cluster_name,
                cfg.cluster.pool_name,
                cfg.cluster.unit_size
            );
            Ok(Arc::new(cluster::ClusterStore::new(
                Arc::new(connector),
                cfg.cluster.unit_size,
            )))
        }
    }
}
