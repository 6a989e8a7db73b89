//! Cluster blob storage.
//!
//! The cluster caps every addressable unit at `unit_size` bytes, so a blob is
//! stored as an ordered run of parts. Part 0 is stored under the blob key
//! itself and part `k > 0` under `{key}_{k}`. A single transfer never covers
//! more than `unit_size` bytes, which means it touches at most two parts.
//!
//! The pool handle is opened on first use and kept for the lifetime of the
//! store.

use super::{
    BlobStore, StorageError, StorageResult,
    pool::{ClusterConnector, ClusterPool},
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use std::{ops::Range, sync::Arc};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Largest slice handed to the pool in one write call.
pub const MAX_WRITE_PIECE: u64 = 20 * 1024 * 1024;

/// Default per-unit size limit of the cluster.
pub const DEFAULT_UNIT_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// One pool transfer produced by [`plan_parts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartTask {
    pub part_index: u64,
    pub part_id: String,
    /// Offset inside the part.
    pub part_offset: u64,
    /// Span of the caller's buffer that belongs to this part.
    pub slice: Range<usize>,
}

/// Unit id of part `index` of `blob_id`.
pub fn part_id(blob_id: &str, index: u64) -> String {
    if index == 0 {
        blob_id.to_string()
    } else {
        format!("{blob_id}_{index}")
    }
}

/// Number of parts a blob of `size` bytes occupies. An empty blob still has
/// part 0.
pub fn parts_for_size(size: u64, limit: u64) -> u64 {
    if limit == 0 {
        return 1;
    }
    size.div_ceil(limit).max(1)
}

/// Split the transfer `[offset, offset + len)` into per-part tasks.
pub fn plan_parts(blob_id: &str, offset: u64, len: u64, limit: u64) -> StorageResult<Vec<PartTask>> {
    if limit == 0 || len > limit {
        return Err(StorageError::PartTooLarge { len, limit });
    }
    if len == 0 {
        return Ok(Vec::new());
    }
    let end = offset
        .checked_add(len)
        .ok_or(StorageError::PartTooLarge { len, limit })?;

    let start_part = offset / limit;
    let end_part = end.div_ceil(limit) - 1;
    let part_offset = offset % limit;
    let len = len as usize;

    if start_part == end_part {
        return Ok(vec![PartTask {
            part_index: start_part,
            part_id: part_id(blob_id, start_part),
            part_offset,
            slice: 0..len,
        }]);
    }

    let split = (limit - part_offset) as usize;
    Ok(vec![
        PartTask {
            part_index: start_part,
            part_id: part_id(blob_id, start_part),
            part_offset,
            slice: 0..split,
        },
        PartTask {
            part_index: end_part,
            part_id: part_id(blob_id, end_part),
            part_offset: 0,
            slice: split..len,
        },
    ])
}

pub struct ClusterStore {
    connector: Arc<dyn ClusterConnector>,
    pool: OnceCell<Arc<dyn ClusterPool>>,
    unit_size: u64,
}

impl ClusterStore {
    pub fn new(connector: Arc<dyn ClusterConnector>, unit_size: u64) -> Self {
        Self {
            connector,
            pool: OnceCell::new(),
            unit_size,
        }
    }

    async fn pool(&self) -> StorageResult<&Arc<dyn ClusterPool>> {
        self.pool
            .get_or_try_init(|| async {
                debug!("opening cluster pool connection");
                self.connector.connect().await
            })
            .await
    }

    fn piece_len(&self) -> u64 {
        MAX_WRITE_PIECE.min(self.unit_size).max(1)
    }

    /// Read up to `len` bytes at `offset` from a blob of `total` bytes.
    async fn read_within(
        &self,
        key: &str,
        offset: u64,
        len: u64,
        total: u64,
    ) -> StorageResult<Bytes> {
        if offset >= total || len == 0 {
            return Ok(Bytes::new());
        }
        let want = len.min(total - offset);
        let pool = self.pool().await?;

        let mut out = BytesMut::with_capacity(want as usize);
        let mut cursor = offset;
        while cursor < offset + want {
            let step = (offset + want - cursor).min(self.unit_size);
            for task in plan_parts(key, cursor, step, self.unit_size)? {
                let expected = task.slice.len();
                let got = pool
                    .read_at(&task.part_id, task.part_offset, expected as u64)
                    .await?
                    .unwrap_or_default();
                out.extend_from_slice(&got);
                if got.len() < expected {
                    out.resize(out.len() + expected - got.len(), 0);
                }
            }
            cursor += step;
        }
        Ok(out.freeze())
    }

    async fn remove_part(pool: &Arc<dyn ClusterPool>, unit: &str) -> StorageResult<()> {
        match pool.remove(unit).await {
            Ok(existed) => {
                debug!("removed part {unit} (existed: {existed})");
                Ok(())
            }
            Err(first) => {
                warn!("removing part {unit} failed, retrying once: {first}");
                pool.remove(unit).await.map(|_| ())
            }
        }
    }
}

#[async_trait]
impl BlobStore for ClusterStore {
    fn kind(&self) -> &'static str {
        "cluster"
    }

    async fn write(&self, key: &str, offset: u64, data: &[u8]) -> StorageResult<()> {
        let pool = self.pool().await?;

        // Parts before the first touched one must exist so size probing stays
        // contiguous.
        for index in 0..offset / self.unit_size.max(1) {
            let unit = part_id(key, index);
            if pool.stat(&unit).await?.is_none() {
                pool.write_at(&unit, 0, &[]).await?;
            }
        }

        let piece = self.piece_len() as usize;
        for (n, chunk) in data.chunks(piece).enumerate() {
            let chunk_offset = offset + (n * piece) as u64;
            let tasks = plan_parts(key, chunk_offset, chunk.len() as u64, self.unit_size)?;
            for task in tasks {
                debug!(
                    "cluster write {} bytes to {} at {}",
                    task.slice.len(),
                    task.part_id,
                    task.part_offset
                );
                pool.write_at(&task.part_id, task.part_offset, &chunk[task.slice.clone()])
                    .await?;
            }
        }
        Ok(())
    }

    async fn read(&self, key: &str, offset: u64, len: u64) -> StorageResult<Bytes> {
        let total = self.size(key).await?;
        self.read_within(key, offset, len, total).await
    }

    /// Part-wise stats run once per stream; every step is clamped against
    /// the size taken at the start.
    fn stream_range(
        self: Arc<Self>,
        key: String,
        start: u64,
        end_inclusive: u64,
        step: u64,
    ) -> BoxStream<'static, StorageResult<Bytes>> {
        let step = step.max(1);
        stream::try_unfold(
            (self, key, start, None),
            move |(store, key, offset, total): (Arc<Self>, String, u64, Option<u64>)| async move {
                if offset > end_inclusive {
                    return Ok(None);
                }
                let total = match total {
                    Some(total) => total,
                    None => store.size(&key).await?,
                };
                let want = (end_inclusive - offset + 1).min(step);
                let chunk = store.read_within(&key, offset, want, total).await?;
                if chunk.is_empty() {
                    return Ok(None);
                }
                let next = offset + chunk.len() as u64;
                Ok(Some((chunk, (store, key, next, Some(total)))))
            },
        )
        .boxed()
    }

    async fn size(&self, key: &str) -> StorageResult<u64> {
        let pool = self.pool().await?;
        let mut last: Option<(u64, u64)> = None;
        let mut index = 0;
        while let Some(len) = pool.stat(&part_id(key, index)).await? {
            last = Some((index, len));
            index += 1;
        }
        Ok(last.map_or(0, |(index, len)| index * self.unit_size + len))
    }

    async fn delete(&self, key: &str, recorded_size: u64) -> StorageResult<()> {
        let stored = self.size(key).await?;
        let pool = self.pool().await?;
        let parts = parts_for_size(recorded_size.max(stored), self.unit_size);
        for index in 0..parts {
            Self::remove_part(pool, &part_id(key, index)).await?;
        }
        Ok(())
    }

    async fn probe(&self) -> StorageResult<()> {
        let pool = self.pool().await?;
        pool.stat("harbor-readyz").await.map(|_| ())
    }
}
