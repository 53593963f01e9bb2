//! CLI command implementations.

pub mod exec;
pub mod history;
pub mod inspect;
pub mod restore;
pub mod serve;
pub mod snapshot;

use std::path::Path;
use std::sync::Arc;
use vfsync_core::{ProjectRepository, RepositoryConfig, VersionedDocumentStore};
use vfsync_protocol::{ChangeId, Value};

/// Result type shared by the commands.
pub type CommandResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Output format of the listing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Opens the repository at `root` and the document of `project`.
///
/// Only `create` allows a new project to be made; otherwise a missing
/// project is an error.
pub fn open_project(
    root: &Path,
    project: &str,
    create: bool,
) -> CommandResult<(ProjectRepository, Arc<VersionedDocumentStore>)> {
    let repo = ProjectRepository::open(RepositoryConfig::new(root))?;
    if !create && repo.document_id(project)?.is_none() {
        return Err(format!("no project {project:?} under {}", root.display()).into());
    }
    let store = repo.open_project(project)?;
    Ok((repo, store))
}

/// Finds the change named by a full id or a unique hex prefix.
pub fn resolve_change(store: &VersionedDocumentStore, reference: &str) -> CommandResult<ChangeId> {
    let reference = reference.trim().to_ascii_lowercase();
    if reference.len() == 64 {
        let id = ChangeId::from_hex(&reference)?;
        if store.contains_change(&id) {
            return Ok(id);
        }
        return Err(format!("unknown change {reference}").into());
    }
    if reference.len() < 4 {
        return Err("change id prefix must be at least 4 characters".into());
    }
    let matches: Vec<ChangeId> = store
        .changes()
        .into_iter()
        .map(|(id, _)| id)
        .filter(|id| id.to_hex().starts_with(&reference))
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(format!("unknown change {reference}").into()),
        _ => Err(format!("change prefix {reference} is ambiguous ({} matches)", matches.len()).into()),
    }
}

/// One-line description of a file value.
pub fn describe_value(value: &Value) -> String {
    match value {
        Value::Text(text) => format!("text, {} chars", text.chars().count()),
        Value::Binary(bytes) => format!("binary, {}", format_size(bytes.len() as u64)),
        Value::Counter(n) => format!("counter {n}"),
    }
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;
    use vfsync_core::Origin;

    /// A repository holding project `demo` with `files`.
    pub(crate) fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        let (repo, store) = open_project(dir.path(), "demo", true).unwrap();
        if !files.is_empty() {
            store
                .change(Origin::Local, |tx| {
                    for (path, text) in files {
                        tx.put_text(path, *text)?;
                    }
                    Ok(())
                })
                .unwrap();
        }
        repo.close(&store).unwrap();
        dir
    }

    #[test]
    fn missing_projects_are_not_created() {
        let dir = TempDir::new().unwrap();
        assert!(open_project(dir.path(), "ghost", false).is_err());
        assert!(open_project(dir.path(), "ghost", true).is_ok());
        assert!(open_project(dir.path(), "ghost", false).is_ok());
    }

    #[test]
    fn changes_resolve_by_prefix() {
        let dir = project(&[("/a.txt", "a")]);
        let (_repo, store) = open_project(dir.path(), "demo", false).unwrap();
        let (id, _) = store.changes().into_iter().next().unwrap();
        let hex = id.to_hex();
        assert_eq!(resolve_change(&store, &hex).unwrap(), id);
        assert_eq!(resolve_change(&store, &hex[..8].to_uppercase()).unwrap(), id);
        assert!(resolve_change(&store, "ab").is_err());
        assert!(resolve_change(&store, &"0".repeat(64)).is_err());
    }

    #[test]
    fn sizes_are_readable() {
        assert_eq!(format_size(12), "12 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
