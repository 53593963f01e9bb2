//! Dependency manifest projection.
//!
//! The manifest is an ordinary file at [`MANIFEST_PATH`]. The dependency
//! table is only ever derived from that file's latest content; writers
//! change the file and the table follows.

use crate::change_feed::DocumentEvent;
use crate::error::{CoreError, CoreResult};
use crate::store::VersionedDocumentStore;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;

/// Canonical location of the dependency manifest.
pub const MANIFEST_PATH: &str = "/package.json";

/// Package name to version specifier.
pub type DependencyTable = BTreeMap<String, String>;

type Listener = Box<dyn Fn(&DependencyTable) + Send + Sync>;

/// Extracts the `dependencies` table from manifest JSON.
///
/// Malformed JSON, a non-object root or a missing table all yield an empty
/// table. Non-string versions are skipped.
#[must_use]
pub fn parse_dependencies(content: &str) -> DependencyTable {
    let root: Json = match serde_json::from_str(content) {
        Ok(root) => root,
        Err(err) => {
            tracing::warn!(error = %err, "manifest is not valid JSON");
            return DependencyTable::new();
        }
    };
    root.get("dependencies")
        .and_then(Json::as_object)
        .map(|deps| {
            deps.iter()
                .filter_map(|(name, version)| Some((name.clone(), version.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Returns `content` with each `(name, version)` upserted into its
/// `dependencies` table.
///
/// Other top-level fields are preserved. Missing or malformed content
/// starts from an empty object.
///
/// # Errors
///
/// Returns [`CoreError::Manifest`] if the result cannot be serialized.
pub fn upsert_dependencies(content: Option<&str>, specs: &[(String, String)]) -> CoreResult<String> {
    let mut root = content
        .and_then(|c| serde_json::from_str::<Json>(c).ok())
        .and_then(|v| match v {
            Json::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();

    let deps = root
        .entry("dependencies")
        .or_insert_with(|| Json::Object(Map::new()));
    if !deps.is_object() {
        *deps = Json::Object(Map::new());
    }
    if let Json::Object(table) = deps {
        for (name, version) in specs {
            table.insert(name.clone(), Json::String(version.clone()));
        }
    }

    let mut rendered = serde_json::to_string_pretty(&Json::Object(root)).map_err(|e| {
        CoreError::Manifest {
            message: e.to_string(),
        }
    })?;
    rendered.push('\n');
    Ok(rendered)
}

/// Keeps a live dependency table in step with the manifest file.
///
/// Listeners fire only when the table actually changes.
pub struct DependencyManifestManager {
    path: String,
    table: RwLock<DependencyTable>,
    listeners: Mutex<Vec<Listener>>,
}

impl DependencyManifestManager {
    /// Creates a manager for [`MANIFEST_PATH`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_path(MANIFEST_PATH)
    }

    /// Creates a manager for a custom manifest path.
    #[must_use]
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            path: vfsync_protocol::normalize_path(&path.into()),
            table: RwLock::new(DependencyTable::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// The manifest path being tracked.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current dependency table.
    #[must_use]
    pub fn dependencies(&self) -> DependencyTable {
        self.table.read().clone()
    }

    /// Registers a change listener.
    pub fn on_change(&self, listener: impl Fn(&DependencyTable) + Send + Sync + 'static) {
        self.listeners.lock().push(Box::new(listener));
    }

    /// Recomputes the table from the manifest's latest content (`None` if the
    /// file is absent). Returns whether the table changed.
    pub fn observe(&self, content: Option<&str>) -> bool {
        let next = content.map(parse_dependencies).unwrap_or_default();
        {
            let mut table = self.table.write();
            if *table == next {
                return false;
            }
            *table = next.clone();
        }
        tracing::debug!(count = next.len(), "dependency table changed");
        for listener in self.listeners.lock().iter() {
            listener(&next);
        }
        true
    }

    /// Re-derives the table from `store`.
    pub fn refresh(&self, store: &VersionedDocumentStore) -> bool {
        let content = store.get_text(&self.path);
        self.observe(content.as_deref())
    }

    /// Re-derives the table if `event` touched the manifest.
    pub fn handle_event(&self, store: &VersionedDocumentStore, event: &DocumentEvent) -> bool {
        if event.changed_files().any(|p| p == self.path) {
            self.refresh(store)
        } else {
            false
        }
    }
}

impl Default for DependencyManifestManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DependencyManifestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyManifestManager")
            .field("path", &self.path)
            .field("dependencies", &*self.table.read())
            .finish()
    }
}
