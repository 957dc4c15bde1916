//! Snapshot persistence.
//!
//! The engine loads snapshots at start and saves them at stop. The core
//! never assumes a storage technology; [`SnapshotStore`] is the seam.

use crate::error::PersistenceError;
use crate::model::TwinState;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Storage collaborator for twin state snapshots.
pub trait SnapshotStore: Send + Sync {
    /// Loads the latest snapshot for a twin, if one exists.
    fn load(&self, twin_id: &str) -> Result<Option<TwinState>, PersistenceError>;

    /// Saves a snapshot, replacing any previous one for the same twin.
    fn save(&self, state: &TwinState) -> Result<(), PersistenceError>;
}

/// In-memory snapshot store. Useful for tests and ephemeral twins.
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<HashMap<String, TwinState>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored snapshots.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.read().len()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self, twin_id: &str) -> Result<Option<TwinState>, PersistenceError> {
        Ok(self.snapshots.read().get(twin_id).cloned())
    }

    fn save(&self, state: &TwinState) -> Result<(), PersistenceError> {
        self.snapshots
            .write()
            .insert(state.twin_id.clone(), state.clone());
        Ok(())
    }
}

/// Snapshot metadata stored alongside the snapshot files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub twin_id: String,
    pub version: u64,
    pub size_bytes: u64,
    pub checksum: String,
}

/// File-backed snapshot store: one JSON file per twin plus a checksummed
/// index.
pub struct FileSnapshotStore {
    dir: PathBuf,
    /// In-memory index of snapshots by twin_id.
    index: RwLock<HashMap<String, SnapshotMeta>>,
}

impl FileSnapshotStore {
    /// Opens or creates a snapshot store at the given directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let store = Self {
            dir,
            index: RwLock::new(HashMap::new()),
        };
        store.load_index()?;

        Ok(store)
    }

    /// Lists all snapshot metadata.
    pub fn list_snapshots(&self) -> Vec<SnapshotMeta> {
        self.index.read().values().cloned().collect()
    }

    /// Returns the number of snapshots stored.
    pub fn snapshot_count(&self) -> usize {
        self.index.read().len()
    }

    fn load_index(&self) -> Result<(), PersistenceError> {
        let index_path = self.dir.join("index.json");
        if !index_path.exists() {
            return Ok(());
        }

        let file = File::open(&index_path)?;
        let reader = BufReader::new(file);
        let index: HashMap<String, SnapshotMeta> = serde_json::from_reader(reader)?;
        *self.index.write() = index;

        Ok(())
    }

    fn save_index(&self) -> Result<(), PersistenceError> {
        let index_path = self.dir.join("index.json");
        let file = File::create(&index_path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &*self.index.read())?;
        Ok(())
    }

    fn snapshot_path(&self, twin_id: &str) -> PathBuf {
        self.dir.join(format!("{}.snap", twin_id))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self, twin_id: &str) -> Result<Option<TwinState>, PersistenceError> {
        let meta = match self.index.read().get(twin_id) {
            Some(meta) => meta.clone(),
            None => return Ok(None),
        };

        let path = self.snapshot_path(twin_id);
        if !path.exists() {
            return Err(PersistenceError::SnapshotNotFound(twin_id.to_string()));
        }

        let mut file = File::open(&path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let actual_checksum = format!("{:08x}", crc32c::crc32c(&data));
        if actual_checksum != meta.checksum {
            return Err(PersistenceError::Corruption(format!(
                "snapshot for twin '{}' checksum mismatch",
                twin_id
            )));
        }

        let state: TwinState = serde_json::from_slice(&data)?;
        Ok(Some(state))
    }

    fn save(&self, state: &TwinState) -> Result<(), PersistenceError> {
        let data = serde_json::to_vec_pretty(state)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&data));

        let path = self.snapshot_path(&state.twin_id);
        let mut file = File::create(&path)?;
        file.write_all(&data)?;
        file.sync_all()?;

        let meta = SnapshotMeta {
            twin_id: state.twin_id.clone(),
            version: state.version,
            size_bytes: data.len() as u64,
            checksum,
        };

        {
            let mut index = self.index.write();
            index.insert(state.twin_id.clone(), meta);
        }
        self.save_index()?;

        tracing::info!(
            twin_id = %state.twin_id,
            version = state.version,
            "snapshot saved"
        );

        Ok(())
    }
}
