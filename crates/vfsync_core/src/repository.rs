//! Project open/close over durable history.

use crate::config::{DocumentConfig, RepositoryConfig};
use crate::error::CoreResult;
use crate::history_log::HistoryLog;
use crate::store::VersionedDocumentStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use vfsync_storage::{
    FileBackend, FilePointerStore, InMemoryBackend, MemoryPointerStore, PointerStore, StorageBackend,
};

enum Logs {
    Disk,
    Memory(Mutex<HashMap<String, InMemoryBackend>>),
}

/// Resolves project ids to documents and opens their history.
///
/// The pointer from project id to document id is created on first open and
/// reused afterwards, so a project keeps its history across sessions.
pub struct ProjectRepository {
    config: RepositoryConfig,
    pointers: Box<dyn PointerStore>,
    logs: Logs,
}

impl ProjectRepository {
    /// Opens a repository on disk, creating its root if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be created or the pointer file is
    /// corrupted.
    pub fn open(config: RepositoryConfig) -> CoreResult<Self> {
        std::fs::create_dir_all(config.root())?;
        let pointers = FilePointerStore::open(&config.pointer_path())?;
        tracing::debug!(root = %config.root().display(), "opened project repository");
        Ok(Self {
            config,
            pointers: Box::new(pointers),
            logs: Logs::Disk,
        })
    }

    /// A repository that lives only in memory. Reopening a project within
    /// the same repository still replays its history.
    #[must_use]
    pub fn in_memory(document: DocumentConfig) -> Self {
        Self {
            config: RepositoryConfig::new("").document(document),
            pointers: Box::new(MemoryPointerStore::new()),
            logs: Logs::Memory(Mutex::new(HashMap::new())),
        }
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Document id recorded for `project_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the pointer store cannot be read.
    pub fn document_id(&self, project_id: &str) -> CoreResult<Option<String>> {
        Ok(self.pointers.get(project_id)?)
    }

    /// Opens `project_id`, creating an empty document on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the pointer cannot be saved or the history fails
    /// verification.
    pub fn open_project(&self, project_id: &str) -> CoreResult<Arc<VersionedDocumentStore>> {
        let document_id = match self.pointers.get(project_id)? {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().simple().to_string();
                self.pointers.set(project_id, &id)?;
                tracing::info!(project = project_id, document = %id, "created project document");
                id
            }
        };

        let backend: Box<dyn StorageBackend> = match &self.logs {
            Logs::Disk => Box::new(FileBackend::open(&self.config.document_path(&document_id))?),
            Logs::Memory(logs) => Box::new(logs.lock().entry(document_id.clone()).or_default().clone()),
        };
        let (log, changes) = HistoryLog::open(backend, self.config.sync_on_append)?;
        let store = VersionedDocumentStore::open(self.config.document.clone(), log, changes)?;
        tracing::info!(
            project = project_id,
            document = %document_id,
            changes = store.change_count(),
            "opened project"
        );
        Ok(Arc::new(store))
    }

    /// Flushes a project's history to stable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn close(&self, store: &VersionedDocumentStore) -> CoreResult<()> {
        store.sync()
    }

    /// Drops the pointer for `project_id`. The history file is left in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the pointer store cannot be written.
    pub fn forget(&self, project_id: &str) -> CoreResult<bool> {
        Ok(self.pointers.remove(project_id)?)
    }
}

impl std::fmt::Debug for ProjectRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectRepository")
            .field("root", &self.config.root)
            .field("in_memory", &matches!(self.logs, Logs::Memory(_)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Origin;
    use tempfile::tempdir;

    #[test]
    fn disk_project_survives_restart() {
        let dir = tempdir().unwrap();
        let config = RepositoryConfig::new(dir.path());
        let heads = {
            let repo = ProjectRepository::open(config.clone()).unwrap();
            let store = repo.open_project("demo").unwrap();
            store.change(Origin::Local, |tx| tx.put_text("/index.html", "<h1>hi</h1>")).unwrap();
            store.change(Origin::Local, |tx| tx.put_text("/app.js", "run()")).unwrap();
            repo.close(&store).unwrap();
            store.heads()
        };

        let repo = ProjectRepository::open(config).unwrap();
        let store = repo.open_project("demo").unwrap();
        assert_eq!(store.heads(), heads);
        assert_eq!(store.file_paths(), vec!["/app.js", "/index.html"]);
        assert!(repo.document_id("demo").unwrap().is_some());
        assert!(repo.document_id("other").unwrap().is_none());
    }

    #[test]
    fn memory_projects_are_isolated() {
        let repo = ProjectRepository::in_memory(DocumentConfig::default());
        let a = repo.open_project("a").unwrap();
        a.change(Origin::Local, |tx| tx.put_text("/x", "1")).unwrap();
        let b = repo.open_project("b").unwrap();
        assert!(b.view().is_empty());

        let again = repo.open_project("a").unwrap();
        assert_eq!(again.get_text("/x").as_deref(), Some("1"));
    }

    #[test]
    fn forget_starts_fresh() {
        let repo = ProjectRepository::in_memory(DocumentConfig::default());
        let store = repo.open_project("p").unwrap();
        store.change(Origin::Local, |tx| tx.put_text("/x", "1")).unwrap();
        assert!(repo.forget("p").unwrap());
        assert!(repo.open_project("p").unwrap().view().is_empty());
    }
}
