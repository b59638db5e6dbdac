//! Snapshot Stores
//!
//! Named, opaque snapshot blobs. The [`SnapshotStore`] contract is
//! deliberately forgiving (`bool` / `Option`); the fallible `try_*` methods
//! on each store say what went wrong.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::persistence::snapshot::{CompetitionSnapshot, SNAPSHOT_VERSION};

/// Directory under the home directory used by [`FileStore::in_home`].
pub const STORE_DIR_NAME: &str = ".swim-meet-simulator";

/// File extension of saved competitions.
pub const SNAPSHOT_EXTENSION: &str = "w-scs";

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Name is empty or would escape the store.
    #[error("Invalid snapshot name: {0:?}")]
    InvalidName(String),

    /// Snapshot decoded but cannot be used.
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// No home directory to place the store in.
    #[error("Home directory not found")]
    NoHomeDir,
}

/// Persistence collaborator.
pub trait SnapshotStore: Send + Sync {
    /// Save `snapshot` under `name`, replacing any previous one.
    fn save(&self, snapshot: &CompetitionSnapshot, name: &str) -> bool;

    /// Load the snapshot saved under `name`.
    fn load(&self, name: &str) -> Option<CompetitionSnapshot>;

    /// Names of all saved snapshots, sorted.
    fn list(&self) -> Vec<String>;

    /// Delete the snapshot saved under `name`. Returns whether one existed.
    fn remove(&self, name: &str) -> bool;
}

fn check_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.chars().any(|c| c == '/' || c == '\\' || c.is_control());
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

fn decode(data: &[u8]) -> Result<CompetitionSnapshot, StoreError> {
    let snapshot = CompetitionSnapshot::from_bytes(data)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(StoreError::InvalidSnapshot(format!(
            "version {} is not supported",
            snapshot.version
        )));
    }
    Ok(snapshot)
}

// =============================================================================
// FILE STORE
// =============================================================================

/// One `<name>.w-scs` file per snapshot in a single directory.
#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Store in `root`. The directory is created on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store in `~/.swim-meet-simulator/`.
    pub fn in_home() -> Result<Self, StoreError> {
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .ok_or(StoreError::NoHomeDir)?;
        Ok(Self::new(Path::new(&home).join(STORE_DIR_NAME)))
    }

    /// Directory holding the snapshots.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        check_name(name)?;
        Ok(self.root.join(format!("{name}.{SNAPSHOT_EXTENSION}")))
    }

    /// Save, reporting the failure.
    pub fn try_save(&self, snapshot: &CompetitionSnapshot, name: &str) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        let bytes = snapshot.to_bytes()?;
        fs::create_dir_all(&self.root)?;

        // Readers only ever see a complete file.
        let partial = path.with_extension(format!("{SNAPSHOT_EXTENSION}.partial"));
        fs::write(&partial, &bytes)?;
        fs::rename(&partial, &path)?;

        info!("Saved competition {:?} ({} bytes)", name, bytes.len());
        Ok(())
    }

    /// Load, reporting the failure.
    pub fn try_load(&self, name: &str) -> Result<CompetitionSnapshot, StoreError> {
        let path = self.path_for(name)?;
        let snapshot = decode(&fs::read(&path)?)?;
        info!("Loaded competition {:?} saved at {}", name, snapshot.saved_at);
        Ok(snapshot)
    }

    /// List, reporting the failure. A missing directory holds nothing.
    pub fn try_list(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove, reporting the failure. Returns whether a snapshot existed.
    pub fn try_remove(&self, name: &str) -> Result<bool, StoreError> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed competition {:?}", name);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl SnapshotStore for FileStore {
    fn save(&self, snapshot: &CompetitionSnapshot, name: &str) -> bool {
        self.try_save(snapshot, name)
            .map_err(|e| warn!("Could not save competition {:?}: {}", name, e))
            .is_ok()
    }

    fn load(&self, name: &str) -> Option<CompetitionSnapshot> {
        self.try_load(name)
            .map_err(|e| warn!("Could not load competition {:?}: {}", name, e))
            .ok()
    }

    fn list(&self) -> Vec<String> {
        self.try_list().unwrap_or_else(|e| {
            warn!("Could not list competitions in {}: {}", self.root.display(), e);
            Vec::new()
        })
    }

    fn remove(&self, name: &str) -> bool {
        self.try_remove(name).unwrap_or_else(|e| {
            warn!("Could not remove competition {:?}: {}", name, e);
            false
        })
    }
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// Encoded snapshots kept in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SnapshotStore for MemoryStore {
    fn save(&self, snapshot: &CompetitionSnapshot, name: &str) -> bool {
        let encoded = check_name(name).and_then(|()| snapshot.to_bytes().map_err(StoreError::from));
        match encoded {
            Ok(bytes) => {
                self.blobs().insert(name.to_string(), bytes);
                true
            }
            Err(e) => {
                warn!("Could not save competition {:?}: {}", name, e);
                false
            }
        }
    }

    fn load(&self, name: &str) -> Option<CompetitionSnapshot> {
        let bytes = self.blobs().get(name).cloned()?;
        decode(&bytes)
            .map_err(|e| warn!("Could not load competition {:?}: {}", name, e))
            .ok()
    }

    fn list(&self) -> Vec<String> {
        self.blobs().keys().cloned().collect()
    }

    fn remove(&self, name: &str) -> bool {
        self.blobs().remove(name).is_some()
    }
}
