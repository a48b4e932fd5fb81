//! Node store: persistence contract for opaque node blobs.
//!
//! The indexing engine never talks to a file system or KV engine directly;
//! it hands packed node bytes to a [`NodeStore`] and gets back an opaque
//! [`StoreKey`]. Keys are monotonically allocated integers partitioned the
//! same way as entity ids: tree nodes draw from the `Index` partition,
//! transaction-log blocks from the `TxLog` partition, so a key also names
//! the append stream that produced it.
//!
//! Two backends ship with the core:
//!
//! - [`MemoryNodeStore`] for tests and fully in-memory stores
//! - [`FileNodeStore`] backed by `tokio::fs`, one file per key
//!
//! Durability (WAL, fsync policy) is the backing implementation's concern,
//! not specified here.

use crate::error::{Error, Result};
use crate::ids::{Partition, StoreKey};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Persistence contract for packed node blobs.
///
/// Implementations allocate keys themselves; callers treat keys as opaque.
/// `put_root`/`get_root` address a single well-known slot holding the
/// latest published snapshot record.
#[async_trait]
pub trait NodeStore: Debug + Send + Sync {
    /// Persist an index-tree node, returning its key (`Index` partition).
    async fn put(&self, bytes: &[u8]) -> Result<StoreKey>;

    /// Persist a transaction-log block, returning its key (`TxLog`
    /// partition). A distinguished append stream so log blocks and tree
    /// nodes never share key space.
    async fn log_tx(&self, bytes: &[u8]) -> Result<StoreKey>;

    /// Read a blob back. Returns `Error::NotFound` for unknown keys.
    async fn get(&self, key: StoreKey) -> Result<Arc<[u8]>>;

    /// Overwrite the well-known root slot.
    async fn put_root(&self, bytes: &[u8]) -> Result<()>;

    /// Read the root slot, if one has ever been published.
    async fn get_root(&self) -> Result<Option<Arc<[u8]>>>;
}

/// Monotonic per-partition key allocator shared by the backends.
#[derive(Debug)]
struct KeyAllocator {
    index_seq: AtomicU64,
    txlog_seq: AtomicU64,
}

impl KeyAllocator {
    fn new(index_start: u64, txlog_start: u64) -> Self {
        Self {
            index_seq: AtomicU64::new(index_start),
            txlog_seq: AtomicU64::new(txlog_start),
        }
    }

    fn next(&self, partition: Partition) -> StoreKey {
        let counter = match partition {
            Partition::TxLog => &self.txlog_seq,
            _ => &self.index_seq,
        };
        StoreKey::new(partition, counter.fetch_add(1, Ordering::Relaxed))
    }
}

// ============================================================================
// MemoryNodeStore
// ============================================================================

/// In-memory node store for tests and ephemeral databases.
///
/// Clones share the same underlying map (interior mutability), matching how
/// a store handle is passed around the pipeline.
#[derive(Debug, Clone)]
pub struct MemoryNodeStore {
    inner: Arc<MemoryInner>,
}

#[derive(Debug)]
struct MemoryInner {
    blobs: parking_lot::RwLock<HashMap<StoreKey, Arc<[u8]>>>,
    root: parking_lot::RwLock<Option<Arc<[u8]>>>,
    keys: KeyAllocator,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                blobs: parking_lot::RwLock::new(HashMap::new()),
                root: parking_lot::RwLock::new(None),
                keys: KeyAllocator::new(0, 0),
            }),
        }
    }

    /// Number of blobs currently stored. Used by structural-sharing tests.
    pub fn len(&self) -> usize {
        self.inner.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, partition: Partition, bytes: &[u8]) -> StoreKey {
        let key = self.inner.keys.next(partition);
        self.inner.blobs.write().insert(key, Arc::from(bytes));
        key
    }
}

impl Default for MemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn put(&self, bytes: &[u8]) -> Result<StoreKey> {
        Ok(self.insert(Partition::Index, bytes))
    }

    async fn log_tx(&self, bytes: &[u8]) -> Result<StoreKey> {
        Ok(self.insert(Partition::TxLog, bytes))
    }

    async fn get(&self, key: StoreKey) -> Result<Arc<[u8]>> {
        self.inner
            .blobs
            .read()
            .get(&key)
            .cloned()
            .ok_or(Error::NotFound(key))
    }

    async fn put_root(&self, bytes: &[u8]) -> Result<()> {
        *self.inner.root.write() = Some(Arc::from(bytes));
        Ok(())
    }

    async fn get_root(&self) -> Result<Option<Arc<[u8]>>> {
        Ok(self.inner.root.read().clone())
    }
}

// ============================================================================
// FileNodeStore
// ============================================================================

/// File-backed node store: one file per key under partitioned directories.
///
/// Layout beneath the base directory:
///
/// ```text
/// index/{seq:016x}.node    tree nodes
/// txlog/{seq:016x}.node    transaction-log blocks
/// root.json                latest published snapshot record
/// ```
///
/// On open, both directories are scanned so key allocation resumes past
/// every file already present; a reopened store never reissues a key.
#[derive(Debug)]
pub struct FileNodeStore {
    base: PathBuf,
    keys: KeyAllocator,
}

const INDEX_DIR: &str = "index";
const TXLOG_DIR: &str = "txlog";
const ROOT_FILE: &str = "root.json";

impl FileNodeStore {
    /// Open (creating if absent) a store rooted at `base`.
    pub async fn open(base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        tokio::fs::create_dir_all(base.join(INDEX_DIR)).await?;
        tokio::fs::create_dir_all(base.join(TXLOG_DIR)).await?;

        let index_start = next_sequence(&base.join(INDEX_DIR)).await?;
        let txlog_start = next_sequence(&base.join(TXLOG_DIR)).await?;

        tracing::debug!(
            base = %base.display(),
            index_start,
            txlog_start,
            "file node store opened"
        );

        Ok(Self {
            base,
            keys: KeyAllocator::new(index_start, txlog_start),
        })
    }

    fn path_for(&self, key: StoreKey) -> Result<PathBuf> {
        let dir = match key.partition() {
            Some(Partition::TxLog) => TXLOG_DIR,
            Some(Partition::Index) => INDEX_DIR,
            _ => return Err(Error::NotFound(key)),
        };
        Ok(self
            .base
            .join(dir)
            .join(format!("{:016x}.node", key.sequence())))
    }

    async fn write(&self, partition: Partition, bytes: &[u8]) -> Result<StoreKey> {
        let key = self.keys.next(partition);
        let path = self.path_for(key)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(key)
    }
}

/// Scan a node directory for the first unused sequence number.
async fn next_sequence(dir: &Path) -> Result<u64> {
    let mut max: Option<u64> = None;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".node")) else {
            continue;
        };
        if let Ok(seq) = u64::from_str_radix(stem, 16) {
            max = Some(max.map_or(seq, |m: u64| m.max(seq)));
        }
    }
    Ok(max.map_or(0, |m| m + 1))
}

#[async_trait]
impl NodeStore for FileNodeStore {
    async fn put(&self, bytes: &[u8]) -> Result<StoreKey> {
        self.write(Partition::Index, bytes).await
    }

    async fn log_tx(&self, bytes: &[u8]) -> Result<StoreKey> {
        self.write(Partition::TxLog, bytes).await
    }

    async fn get(&self, key: StoreKey) -> Result<Arc<[u8]>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Arc::from(bytes.as_slice())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound(key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_root(&self, bytes: &[u8]) -> Result<()> {
        // Write-then-rename so a crash mid-write never truncates the root.
        let tmp = self.base.join("root.json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, self.base.join(ROOT_FILE)).await?;
        Ok(())
    }

    async fn get_root(&self) -> Result<Option<Arc<[u8]>>> {
        match tokio::fs::read(self.base.join(ROOT_FILE)).await {
            Ok(bytes) => Ok(Some(Arc::from(bytes.as_slice()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_round_trip() {
        let store = MemoryNodeStore::new();
        let key = store.put(b"hello").await.unwrap();
        assert_eq!(key.partition(), Some(Partition::Index));
        assert_eq!(&*store.get(key).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_memory_log_tx_uses_txlog_partition() {
        let store = MemoryNodeStore::new();
        let key = store.log_tx(b"block").await.unwrap();
        assert_eq!(key.partition(), Some(Partition::TxLog));
        // Key spaces don't collide.
        let other = store.put(b"node").await.unwrap();
        assert_ne!(key, other);
    }

    #[tokio::test]
    async fn test_memory_get_unknown_key() {
        let store = MemoryNodeStore::new();
        let missing = StoreKey::new(Partition::Index, 99);
        assert!(matches!(
            store.get(missing).await,
            Err(Error::NotFound(k)) if k == missing
        ));
    }

    #[tokio::test]
    async fn test_memory_root_slot() {
        let store = MemoryNodeStore::new();
        assert!(store.get_root().await.unwrap().is_none());
        store.put_root(b"{\"tx\":1}").await.unwrap();
        assert_eq!(&*store.get_root().await.unwrap().unwrap(), b"{\"tx\":1}");
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileNodeStore::open(dir.path()).await.unwrap();
        let key = store.put(b"packed node bytes").await.unwrap();
        assert_eq!(&*store.get(key).await.unwrap(), b"packed node bytes");

        store.put_root(b"{}").await.unwrap();
        assert_eq!(&*store.get_root().await.unwrap().unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_file_reopen_resumes_key_allocation() {
        let dir = tempfile::tempdir().unwrap();
        let first_key = {
            let store = FileNodeStore::open(dir.path()).await.unwrap();
            store.put(b"a").await.unwrap()
        };

        let store = FileNodeStore::open(dir.path()).await.unwrap();
        let second_key = store.put(b"b").await.unwrap();
        assert!(second_key.sequence() > first_key.sequence());
        // The original blob is still readable.
        assert_eq!(&*store.get(first_key).await.unwrap(), b"a");
    }
}
