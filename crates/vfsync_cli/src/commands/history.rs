//! History command implementation.

use super::{open_project, CommandResult, Format};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use vfsync_core::{SnapshotManager, VersionedDocumentStore};

/// One history line.
#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    /// Change id, hex encoded.
    pub id: String,
    /// Commit time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Message, for checkpoints.
    pub message: Option<String>,
    /// Author, if recorded.
    pub author: Option<String>,
    /// Number of files as of this change.
    pub file_count: usize,
}

/// Lists the history of `store`, oldest first.
///
/// `limit` keeps only the most recent entries.
pub fn entries(
    store: &Arc<VersionedDocumentStore>,
    checkpoints_only: bool,
    limit: Option<usize>,
) -> CommandResult<Vec<HistoryEntry>> {
    let manager = SnapshotManager::new(Arc::clone(store));
    let snapshots = if checkpoints_only {
        manager.snapshots()?
    } else {
        manager.history()?
    };
    let skip = limit.map_or(0, |limit| snapshots.len().saturating_sub(limit));
    Ok(snapshots
        .into_iter()
        .skip(skip)
        .map(|snapshot| HistoryEntry {
            id: snapshot.id.to_hex(),
            timestamp_ms: snapshot.timestamp_ms,
            message: snapshot.message,
            author: snapshot.author,
            file_count: snapshot.files.len(),
        })
        .collect())
}

/// Runs the history command.
pub fn run(
    root: &Path,
    project: &str,
    checkpoints_only: bool,
    limit: Option<usize>,
    format: Format,
) -> CommandResult<()> {
    let (_repo, store) = open_project(root, project, false)?;
    let entries = entries(&store, checkpoints_only, limit)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        Format::Text => {
            if entries.is_empty() {
                println!("(no history)");
            }
            for entry in &entries {
                println!(
                    "{}  {:>13}  {:>4} files  {}{}",
                    &entry.id[..12],
                    entry.timestamp_ms,
                    entry.file_count,
                    entry.message.as_deref().unwrap_or("-"),
                    entry
                        .author
                        .as_deref()
                        .map(|author| format!(" ({author})"))
                        .unwrap_or_default(),
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::project;
    use vfsync_core::Origin;

    #[test]
    fn lists_changes_and_checkpoints() {
        let dir = project(&[("/a.txt", "1")]);
        let (repo, store) = open_project(dir.path(), "demo", false).unwrap();
        SnapshotManager::new(Arc::clone(&store))
            .create_snapshot("v1")
            .unwrap();
        store.change(Origin::Local, |tx| tx.put_text("/b.txt", "2")).unwrap();
        repo.close(&store).unwrap();

        let all = entries(&store, false, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.last().unwrap().file_count, 2);

        let checkpoints = entries(&store, true, None).unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].message.as_deref(), Some("v1"));

        let recent = entries(&store, false, Some(1)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, all[2].id);
    }
}
