//! Storage-cluster pool access.
//!
//! The cluster backend addresses size-limited units inside one pool. This
//! module holds the seam it talks through plus the implementations we ship:
//! a directory-backed pool for single-host deployments and an in-memory pool
//! for tests.

use super::{StorageError, StorageResult};
use crate::config::ClusterSettings;
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    io::{ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};
#[cfg(test)]
use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::info;

/// Unit-addressed byte storage inside one cluster pool.
#[async_trait]
pub trait ClusterPool: Send + Sync {
    /// Write `data` at `offset` in `unit`, creating it if absent.
    async fn write_at(&self, unit: &str, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Read up to `len` bytes at `offset`. `None` when the unit does not exist.
    async fn read_at(&self, unit: &str, offset: u64, len: u64) -> StorageResult<Option<Bytes>>;

    /// Byte length of `unit`, `None` when it does not exist.
    async fn stat(&self, unit: &str) -> StorageResult<Option<u64>>;

    /// Remove `unit`. Returns whether it existed.
    async fn remove(&self, unit: &str) -> StorageResult<bool>;
}

/// Opens a pool handle. Called at most once per cluster backend instance.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self) -> StorageResult<Arc<dyn ClusterPool>>;
}

fn check_unit_bounds(unit: &str, offset: u64, len: u64, limit: u64) -> StorageResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= limit => Ok(()),
        _ => Err(StorageError::UnitOverflow {
            unit: unit.to_string(),
            offset,
            len,
            limit,
        }),
    }
}

/// Connector for [`FsClusterPool`].
pub struct FsClusterConnector {
    settings: ClusterSettings,
}

impl FsClusterConnector {
    pub fn new(settings: ClusterSettings) -> Self {
        Self { settings }
    }

    async fn require_file(path: &Path, what: &str) -> StorageResult<()> {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(()),
            Ok(_) => Err(StorageError::Connection(format!(
                "{what} `{}` is not a regular file",
                path.display()
            ))),
            Err(err) => Err(StorageError::Connection(format!(
                "{what} `{}`: {err}",
                path.display()
            ))),
        }
    }
}

#[async_trait]
impl ClusterConnector for FsClusterConnector {
    async fn connect(&self) -> StorageResult<Arc<dyn ClusterPool>> {
        let s = &self.settings;
        Self::require_file(&s.conf_file, "cluster config").await?;
        Self::require_file(&s.keyring_file, "cluster keyring").await?;
        if s.pool_name.is_empty() {
            return Err(StorageError::Connection("pool name is empty".into()));
        }

        let root = s.pool_root.join(&s.pool_name);
        fs::create_dir_all(&root)
            .await
            .map_err(|err| StorageError::Connection(format!("open pool `{}`: {err}", s.pool_name)))?;
        info!(
            "Connected to cluster `{}` as `{}`, pool `{}` at {}",
            s.cluster_name,
            s.user,
            s.pool_name,
            root.display()
        );
        Ok(Arc::new(FsClusterPool::new(root, s.unit_size)))
    }
}

/// Pool whose units are plain files in one directory.
pub struct FsClusterPool {
    root: PathBuf,
    unit_limit: u64,
}

impl FsClusterPool {
    pub fn new(root: impl Into<PathBuf>, unit_limit: u64) -> Self {
        Self {
            root: root.into(),
            unit_limit,
        }
    }

    fn unit_path(&self, unit: &str) -> StorageResult<PathBuf> {
        if unit.is_empty() || unit.contains('/') || unit.contains('\\') || unit.starts_with('.') {
            return Err(StorageError::InvalidKey(unit.to_string()));
        }
        Ok(self.root.join(unit))
    }
}

#[async_trait]
impl ClusterPool for FsClusterPool {
    async fn write_at(&self, unit: &str, offset: u64, data: &[u8]) -> StorageResult<()> {
        check_unit_bounds(unit, offset, data.len() as u64, self.unit_limit)?;
        let path = self.unit_path(unit)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_at(&self, unit: &str, offset: u64, len: u64) -> StorageResult<Option<Bytes>> {
        let path = self.unit_path(unit)?;
        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::new();
        file.take(len).read_to_end(&mut buf).await?;
        Ok(Some(Bytes::from(buf)))
    }

    async fn stat(&self, unit: &str) -> StorageResult<Option<u64>> {
        let path = self.unit_path(unit)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn remove(&self, unit: &str) -> StorageResult<bool> {
        let path = self.unit_path(unit)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-process pool used by tests.
#[cfg(test)]
pub struct MemoryClusterPool {
    units: Mutex<HashMap<String, Vec<u8>>>,
    unit_limit: u64,
    stats: AtomicUsize,
}

#[cfg(test)]
impl MemoryClusterPool {
    pub fn new(unit_limit: u64) -> Self {
        Self {
            units: Mutex::new(HashMap::new()),
            unit_limit,
            stats: AtomicUsize::new(0),
        }
    }

    /// Number of `stat` calls served so far.
    pub fn stat_count(&self) -> usize {
        self.stats.load(Ordering::SeqCst)
    }

    /// Names of all units currently stored, sorted.
    pub fn unit_names(&self) -> Vec<String> {
        let units = self.units.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = units.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
#[async_trait]
impl ClusterPool for MemoryClusterPool {
    async fn write_at(&self, unit: &str, offset: u64, data: &[u8]) -> StorageResult<()> {
        check_unit_bounds(unit, offset, data.len() as u64, self.unit_limit)?;
        let mut units = self.units.lock().unwrap_or_else(|e| e.into_inner());
        let buf = units.entry(unit.to_string()).or_default();
        let start = offset as usize;
        let end = start + data.len();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[start..end].copy_from_slice(data);
        Ok(())
    }

    async fn read_at(&self, unit: &str, offset: u64, len: u64) -> StorageResult<Option<Bytes>> {
        let units = self.units.lock().unwrap_or_else(|e| e.into_inner());
        Ok(units.get(unit).map(|buf| {
            let start = (offset as usize).min(buf.len());
            let end = start.saturating_add(len as usize).min(buf.len());
            Bytes::copy_from_slice(&buf[start..end])
        }))
    }

    async fn stat(&self, unit: &str) -> StorageResult<Option<u64>> {
        self.stats.fetch_add(1, Ordering::SeqCst);
        let units = self.units.lock().unwrap_or_else(|e| e.into_inner());
        Ok(units.get(unit).map(|buf| buf.len() as u64))
    }

    async fn remove(&self, unit: &str) -> StorageResult<bool> {
        let mut units = self.units.lock().unwrap_or_else(|e| e.into_inner());
        Ok(units.remove(unit).is_some())
    }
}

/// Connector that hands out one shared [`MemoryClusterPool`] and counts how
/// often it was asked to connect.
#[cfg(test)]
pub struct MemoryClusterConnector {
    pool: Arc<MemoryClusterPool>,
    connects: AtomicUsize,
}

#[cfg(test)]
impl MemoryClusterConnector {
    pub fn new(pool: Arc<MemoryClusterPool>) -> Self {
        Self {
            pool,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl ClusterConnector for MemoryClusterConnector {
    async fn connect(&self) -> StorageResult<Arc<dyn ClusterPool>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("memory cluster pool connect #{}", self.connect_count());
        Ok(self.pool.clone())
    }
}
