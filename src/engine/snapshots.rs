//! Persistent snapshot storage: an opaque map `pair -> (snapshot, offset)`
//! plus the orchestrator's committed-offset marker.

use crate::assets::AssetPair;
use crate::book::{BookSnapshot, SnapshotError, SnapshotPackage};
use crate::queue::Offset;
use async_trait::async_trait;
use dashmap::DashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Snapshot store failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SnapshotStoreError {
    /// Reading or writing the backing storage failed.
    #[error("snapshot store I/O error: {0}")]
    Io(String),
    /// A stored snapshot failed its integrity or format checks. Fatal at
    /// startup: replaying from damaged state would fork history.
    #[error("stored snapshot is corrupt: {0}")]
    Corrupt(#[from] SnapshotError),
}

/// Durable map of per-pair snapshots.
///
/// Single writer per pair (the pair's worker); the committed-offset marker
/// has a single writer too (the orchestrator's consumer loop).
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist `snapshot`, replacing any previous snapshot of its pair.
    async fn save(&self, snapshot: &BookSnapshot) -> Result<(), SnapshotStoreError>;

    /// The most recent snapshot of `pair`, if one exists.
    async fn load(&self, pair: &AssetPair) -> Result<Option<BookSnapshot>, SnapshotStoreError>;

    /// Every pair with a stored snapshot.
    async fn known_pairs(&self) -> Result<Vec<AssetPair>, SnapshotStoreError>;

    /// Drop the snapshot of `pair` (book deleted).
    async fn remove(&self, pair: &AssetPair) -> Result<(), SnapshotStoreError>;

    /// Persist the orchestrator's last processed offset.
    async fn save_committed(&self, offset: Offset) -> Result<(), SnapshotStoreError>;

    /// The last processed offset recorded by a previous run.
    async fn load_committed(&self) -> Result<Option<Offset>, SnapshotStoreError>;
}

/// File-backed snapshot store: one checksum-wrapped JSON file per pair,
/// written through a temp file and rename so a crash never leaves a torn
/// snapshot behind.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    /// Open or create the store at `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, SnapshotStoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(io_err)?;
        Ok(Self { dir })
    }

    fn pair_path(&self, pair: &AssetPair) -> PathBuf {
        self.dir
            .join(format!("{}.snapshot.json", hex::encode(pair.to_bytes())))
    }

    fn committed_path(&self) -> PathBuf {
        self.dir.join("committed.offset")
    }

    fn write_atomic(&self, path: &Path, contents: &str) -> Result<(), SnapshotStoreError> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, snapshot: &BookSnapshot) -> Result<(), SnapshotStoreError> {
        let package = SnapshotPackage::new(snapshot);
        let json = package.to_json()?;
        self.write_atomic(&self.pair_path(&snapshot.pair), &json)?;
        debug!(pair = %snapshot.pair, offset = snapshot.offset, "snapshot persisted");
        Ok(())
    }

    async fn load(&self, pair: &AssetPair) -> Result<Option<BookSnapshot>, SnapshotStoreError> {
        let path = self.pair_path(pair);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_err(err)),
        };
        Ok(Some(SnapshotPackage::from_json(&json)?.into_snapshot()?))
    }

    async fn known_pairs(&self) -> Result<Vec<AssetPair>, SnapshotStoreError> {
        let mut pairs = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".snapshot.json") else {
                continue;
            };
            let Ok(bytes) = hex::decode(stem) else {
                warn!(file = name, "ignoring unparseable snapshot file");
                continue;
            };
            let mut pos = 0usize;
            match AssetPair::read_bytes(&bytes, &mut pos) {
                Some(pair) if pos == bytes.len() => pairs.push(pair),
                _ => warn!(file = name, "ignoring unparseable snapshot file"),
            }
        }
        pairs.sort();
        Ok(pairs)
    }

    async fn remove(&self, pair: &AssetPair) -> Result<(), SnapshotStoreError> {
        match fs::remove_file(self.pair_path(pair)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(err)),
        }
    }

    async fn save_committed(&self, offset: Offset) -> Result<(), SnapshotStoreError> {
        self.write_atomic(&self.committed_path(), &offset.to_string())
    }

    async fn load_committed(&self) -> Result<Option<Offset>, SnapshotStoreError> {
        let raw = match fs::read_to_string(self.committed_path()) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_err(err)),
        };
        raw.trim()
            .parse::<Offset>()
            .map(Some)
            .map_err(|e| SnapshotStoreError::Io(format!("bad committed offset: {e}")))
    }
}

fn io_err(err: impl std::fmt::Display) -> SnapshotStoreError {
    SnapshotStoreError::Io(err.to_string())
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: DashMap<AssetPair, BookSnapshot>,
    committed: parking_lot::Mutex<Option<Offset>>,
}

impl MemorySnapshotStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, snapshot: &BookSnapshot) -> Result<(), SnapshotStoreError> {
        self.snapshots.insert(snapshot.pair, snapshot.clone());
        Ok(())
    }

    async fn load(&self, pair: &AssetPair) -> Result<Option<BookSnapshot>, SnapshotStoreError> {
        Ok(self.snapshots.get(pair).map(|s| s.clone()))
    }

    async fn known_pairs(&self) -> Result<Vec<AssetPair>, SnapshotStoreError> {
        let mut pairs: Vec<AssetPair> = self.snapshots.iter().map(|e| *e.key()).collect();
        pairs.sort();
        Ok(pairs)
    }

    async fn remove(&self, pair: &AssetPair) -> Result<(), SnapshotStoreError> {
        self.snapshots.remove(pair);
        Ok(())
    }

    async fn save_committed(&self, offset: Offset) -> Result<(), SnapshotStoreError> {
        *self.committed.lock() = Some(offset);
        Ok(())
    }

    async fn load_committed(&self) -> Result<Option<Offset>, SnapshotStoreError> {
        Ok(*self.committed.lock())
    }
}
