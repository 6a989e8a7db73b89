//! Local-disk blob storage.
//!
//! Each blob is a single file below the upload directory, sharded two levels
//! deep by the MD5 of its key: `{upload_dir}/{aa}/{bb}/{key}`.

use super::{BlobStore, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{
    TryStreamExt,
    stream::{self, BoxStream, StreamExt},
};
use std::{
    io::{ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

pub struct LocalDiskStore {
    upload_dir: PathBuf,
}

impl LocalDiskStore {
    /// Open the store, creating the upload directory if it is missing.
    pub async fn new(upload_dir: impl AsRef<Path>) -> StorageResult<Self> {
        let upload_dir = upload_dir.as_ref().to_path_buf();
        fs::create_dir_all(&upload_dir).await?;
        Ok(Self { upload_dir })
    }

    fn shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn blob_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.contains('/') || key.contains('\\') || key.contains("..") {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        let (shard_a, shard_b) = Self::shards(key);
        let mut path = self.upload_dir.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        Ok(path)
    }

    async fn open_for_read(path: &Path) -> StorageResult<Option<File>> {
        match File::open(path).await {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl BlobStore for LocalDiskStore {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn write(&self, key: &str, offset: u64, data: &[u8]) -> StorageResult<()> {
        let path = self.blob_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;
        let pos = file.seek(SeekFrom::Start(offset)).await?;
        if pos != offset {
            return Err(StorageError::Io(std::io::Error::other(format!(
                "seek to {offset} landed at {pos}"
            ))));
        }
        file.write_all(data).await?;
        file.flush().await?;
        debug!("wrote {} bytes at {} to {}", data.len(), offset, path.display());
        Ok(())
    }

    async fn read(&self, key: &str, offset: u64, len: u64) -> StorageResult<Bytes> {
        let path = self.blob_path(key)?;
        let Some(mut file) = Self::open_for_read(&path).await? else {
            return Ok(Bytes::new());
        };
        let total = file.metadata().await?.len();
        if offset >= total || len == 0 {
            return Ok(Bytes::new());
        }
        let want = len.min(total - offset);
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity(want as usize);
        file.take(want).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn size(&self, key: &str) -> StorageResult<u64> {
        let path = self.blob_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, key: &str, _recorded_size: u64) -> StorageResult<()> {
        let path = self.blob_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("removed blob file {}", path.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob file {} already missing", path.display());
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn probe(&self) -> StorageResult<()> {
        let tmp_path = self.upload_dir.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let bytes = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if bytes? != b"readyz" {
            return Err(StorageError::Io(std::io::Error::other(
                "probe file content mismatch",
            )));
        }
        Ok(())
    }

    fn stream_range(
        self: Arc<Self>,
        key: String,
        start: u64,
        end_inclusive: u64,
        step: u64,
    ) -> BoxStream<'static, StorageResult<Bytes>> {
        let path = match self.blob_path(&key) {
            Ok(path) => path,
            Err(err) => return stream::once(async move { Err::<Bytes, _>(err) }).boxed(),
        };
        let len = end_inclusive.saturating_add(1).saturating_sub(start);
        let capacity = step.max(1) as usize;
        stream::once(async move {
            let reader = match Self::open_for_read(&path).await? {
                Some(mut file) => {
                    file.seek(SeekFrom::Start(start)).await?;
                    ReaderStream::with_capacity(file.take(len), capacity)
                        .map_err(StorageError::from)
                        .boxed()
                }
                None => stream::empty().boxed(),
            };
            Ok::<_, StorageError>(reader)
        })
        .try_flatten()
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, Arc<LocalDiskStore>) {
        let dir = TempDir::new().unwrap();
        let store = LocalDiskStore::new(dir.path().join("upload")).await.unwrap();
        (dir, Arc::new(store))
    }

    #[tokio::test]
    async fn creates_upload_dir_and_shards_blob_paths() {
        let (dir, store) = store().await;
        assert!(dir.path().join("upload").is_dir());

        store.write("3_7", 0, b"hello").await.unwrap();
        let path = store.blob_path("3_7").unwrap();
        assert!(path.starts_with(dir.path().join("upload")));
        assert_eq!(path.components().count(), dir.path().join("upload").components().count() + 3);
        assert_eq!(std::fs::read(path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn positional_write_does_not_truncate() {
        let (_dir, store) = store().await;
        store.write("1_1", 0, b"0123456789").await.unwrap();
        store.write("1_1", 2, b"ab").await.unwrap();

        assert_eq!(store.size("1_1").await.unwrap(), 10);
        assert_eq!(&store.read("1_1", 0, 10).await.unwrap()[..], b"01ab456789");
    }

    #[tokio::test]
    async fn write_past_end_zero_fills_gap() {
        let (_dir, store) = store().await;
        store.write("1_2", 4, b"xy").await.unwrap();
        assert_eq!(&store.read("1_2", 0, 100).await.unwrap()[..], b"\0\0\0\0xy");
    }

    #[tokio::test]
    async fn reads_are_short_only_at_end_of_blob() {
        let (_dir, store) = store().await;
        store.write("1_3", 0, b"abcdef").await.unwrap();

        assert_eq!(&store.read("1_3", 1, 3).await.unwrap()[..], b"bcd");
        assert_eq!(&store.read("1_3", 4, 10).await.unwrap()[..], b"ef");
        assert!(store.read("1_3", 6, 10).await.unwrap().is_empty());
        assert!(store.read("1_3", 60, 10).await.unwrap().is_empty());
        assert!(store.read("missing", 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn size_and_delete_of_missing_blob() {
        let (_dir, store) = store().await;
        assert_eq!(store.size("9_9").await.unwrap(), 0);
        store.delete("9_9", 0).await.unwrap();

        store.write("9_9", 0, b"abc").await.unwrap();
        store.delete("9_9", 3).await.unwrap();
        assert_eq!(store.size("9_9").await.unwrap(), 0);
        store.delete("9_9", 3).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_keys_that_escape_the_upload_dir() {
        let (_dir, store) = store().await;
        assert!(matches!(
            store.write("../etc", 0, b"x").await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn stream_range_yields_bounded_steps() {
        let (_dir, store) = store().await;
        let data: Vec<u8> = (0..100u8).collect();
        store.write("2_1", 0, &data).await.unwrap();

        let chunks: Vec<Bytes> = store
            .clone()
            .stream_range("2_1".into(), 10, 59, 16)
            .try_collect()
            .await
            .unwrap();
        assert!(chunks.iter().all(|c| c.len() <= 16));
        let joined: Vec<u8> = chunks.concat();
        assert_eq!(joined, data[10..60].to_vec());
    }

    #[tokio::test]
    async fn stream_range_over_missing_blob_is_empty() {
        let (_dir, store) = store().await;
        let chunks: Vec<Bytes> = store
            .stream_range("4_4".into(), 0, 99, 16)
            .try_collect()
            .await
            .unwrap();
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn probe_round_trips_a_temp_file() {
        let (dir, store) = store().await;
        store.probe().await.unwrap();
        let leftovers = std::fs::read_dir(dir.path().join("upload")).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
