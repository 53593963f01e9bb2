//! Project pointer storage.
//!
//! A project is addressed by a stable project id, while its history lives in
//! a document whose id is minted the first time the project is opened. The
//! pointer store remembers that mapping.

use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Durable `project id -> document id` mapping.
pub trait PointerStore: Send + Sync {
    /// Looks up the document id for `project_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn get(&self, project_id: &str) -> StorageResult<Option<String>>;

    /// Records `document_id` as the history for `project_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping cannot be persisted.
    fn set(&self, project_id: &str, document_id: &str) -> StorageResult<()>;

    /// Forgets `project_id`. Returns whether a mapping existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping cannot be persisted.
    fn remove(&self, project_id: &str) -> StorageResult<bool>;
}

/// Pointer store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryPointerStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryPointerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PointerStore for MemoryPointerStore {
    fn get(&self, project_id: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.read().get(project_id).cloned())
    }

    fn set(&self, project_id: &str, document_id: &str) -> StorageResult<()> {
        self.entries
            .write()
            .insert(project_id.to_string(), document_id.to_string());
        Ok(())
    }

    fn remove(&self, project_id: &str) -> StorageResult<bool> {
        Ok(self.entries.write().remove(project_id).is_some())
    }
}

/// Pointer store persisted as a JSON object in a single file.
///
/// Every update rewrites the whole file through a temporary sibling and an
/// atomic rename, so a crash leaves either the old or the new mapping.
#[derive(Debug)]
pub struct FilePointerStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FilePointerStore {
    /// Opens the store at `path`, loading it if present.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CorruptedPointers`] if the file is not a JSON
    /// object of strings, or an I/O error.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let entries = if path.exists() {
            let raw = fs::read(path)?;
            serde_json::from_slice(&raw)
                .map_err(|e| StorageError::CorruptedPointers(e.to_string()))?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
        })
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let encoded = serde_json::to_vec_pretty(entries)
            .map_err(|e| StorageError::CorruptedPointers(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &self.path)?;
        sync_dir(&dir)?;

        tracing::debug!(path = %self.path.display(), count = entries.len(), "saved project pointers");
        Ok(())
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> StorageResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> StorageResult<()> {
    Ok(())
}

impl PointerStore for FilePointerStore {
    fn get(&self, project_id: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.read().get(project_id).cloned())
    }

    fn set(&self, project_id: &str, document_id: &str) -> StorageResult<()> {
        let mut entries = self.entries.write();
        let mut next = entries.clone();
        next.insert(project_id.to_string(), document_id.to_string());
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }

    fn remove(&self, project_id: &str) -> StorageResult<bool> {
        let mut entries = self.entries.write();
        if !entries.contains_key(project_id) {
            return Ok(false);
        }
        let mut next = entries.clone();
        next.remove(project_id);
        self.persist(&next)?;
        *entries = next;
        Ok(true)
    }
}
