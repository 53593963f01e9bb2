//! Document and repository configuration.

use std::path::{Path, PathBuf};
use vfsync_protocol::ActorId;

/// Configuration for a [`VersionedDocumentStore`](crate::VersionedDocumentStore).
#[derive(Debug, Clone)]
pub struct DocumentConfig {
    /// Identity stamped on every locally produced change.
    pub actor: ActorId,

    /// Author name recorded on local changes.
    pub author: Option<String>,

    /// Number of events the change feed keeps for `poll` catch-up.
    pub feed_history: usize,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            actor: ActorId::new(),
            author: None,
            feed_history: 1024,
        }
    }
}

impl DocumentConfig {
    /// Creates a configuration with a fresh random actor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the actor id.
    #[must_use]
    pub const fn actor(mut self, actor: ActorId) -> Self {
        self.actor = actor;
        self
    }

    /// Sets the author name.
    #[must_use]
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Sets the change-feed history size.
    #[must_use]
    pub const fn feed_history(mut self, events: usize) -> Self {
        self.feed_history = events;
        self
    }
}

/// Configuration for a [`ProjectRepository`](crate::ProjectRepository).
///
/// Layout under `root`:
///
/// ```text
/// <root>/
/// ├── projects.json          # project id -> document id
/// └── documents/
///     └── <document id>.log  # framed change history
/// ```
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Directory holding pointers and documents.
    pub root: PathBuf,

    /// File name of the pointer store, relative to `root`.
    pub pointer_file: String,

    /// Directory of history logs, relative to `root`.
    pub documents_dir: String,

    /// Whether every appended change is synced to disk before commit.
    pub sync_on_append: bool,

    /// Settings for opened documents.
    pub document: DocumentConfig,
}

impl RepositoryConfig {
    /// Creates a configuration rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pointer_file: "projects.json".to_string(),
            documents_dir: "documents".to_string(),
            sync_on_append: true,
            document: DocumentConfig::default(),
        }
    }

    /// Sets the pointer file name.
    #[must_use]
    pub fn pointer_file(mut self, name: impl Into<String>) -> Self {
        self.pointer_file = name.into();
        self
    }

    /// Sets whether appends are synced.
    #[must_use]
    pub const fn sync_on_append(mut self, value: bool) -> Self {
        self.sync_on_append = value;
        self
    }

    /// Sets the document configuration.
    #[must_use]
    pub fn document(mut self, document: DocumentConfig) -> Self {
        self.document = document;
        self
    }

    /// Full path of the pointer file.
    #[must_use]
    pub fn pointer_path(&self) -> PathBuf {
        self.root.join(&self.pointer_file)
    }

    /// Full path of the history log for `document_id`.
    #[must_use]
    pub fn document_path(&self, document_id: &str) -> PathBuf {
        self.root
            .join(&self.documents_dir)
            .join(format!("{document_id}.log"))
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}
