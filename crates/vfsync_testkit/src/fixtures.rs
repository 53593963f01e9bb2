//! Test fixtures and document helpers.

use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;
use vfsync_core::{
    DocumentConfig, DocumentView, Origin, ProjectRepository, RepositoryConfig,
    VersionedDocumentStore,
};
use vfsync_protocol::{ActorId, Value};

/// Deterministic actor id `n`.
#[must_use]
pub fn actor(n: u128) -> ActorId {
    ActorId::from_u128(n)
}

/// A fresh in-memory document owned by actor `n`.
#[must_use]
pub fn empty_store(n: u128) -> Arc<VersionedDocumentStore> {
    Arc::new(VersionedDocumentStore::new(
        DocumentConfig::new().actor(actor(n)),
    ))
}

/// A document holding `files` after a single local change.
///
/// # Panics
///
/// Panics if a path is invalid.
#[must_use]
pub fn seeded_store(files: &[(&str, &str)]) -> Arc<VersionedDocumentStore> {
    let store = empty_store(1);
    store
        .change(Origin::Local, |tx| {
            for (path, text) in files {
                tx.put_text(path, *text)?;
            }
            Ok(())
        })
        .expect("seed paths are valid");
    store
}

/// Text files of a projection; binary files and counters are skipped.
#[must_use]
pub fn text_files(view: &DocumentView) -> BTreeMap<String, String> {
    view.files()
        .iter()
        .filter_map(|(path, value)| match value {
            Value::Text(text) => Some((path.clone(), text.clone())),
            _ => None,
        })
        .collect()
}

/// A project repository in a temporary directory, removed on drop.
pub struct TestRepository {
    /// The repository.
    pub repo: ProjectRepository,
    /// Configuration used to open it; reuse to simulate a restart.
    pub config: RepositoryConfig,
    dir: TempDir,
}

impl TestRepository {
    /// Creates a repository in a new temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the directory or repository cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let config = RepositoryConfig::new(dir.path()).sync_on_append(false);
        let repo = ProjectRepository::open(config.clone()).expect("open repository");
        Self { repo, config, dir }
    }

    /// Drops the open repository and opens it again from disk.
    ///
    /// # Panics
    ///
    /// Panics if the repository cannot be reopened.
    pub fn reopen(&mut self) {
        self.repo = ProjectRepository::open(self.config.clone()).expect("reopen repository");
    }

    /// Root directory.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }
}

impl Default for TestRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestRepository {
    type Target = ProjectRepository;

    fn deref(&self) -> &Self::Target {
        &self.repo
    }
}
