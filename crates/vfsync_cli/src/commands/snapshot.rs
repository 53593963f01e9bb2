//! Snapshot command implementation.

use super::{open_project, CommandResult};
use std::path::Path;
use std::sync::Arc;
use vfsync_core::SnapshotManager;

/// Runs the snapshot command, printing the new checkpoint's id.
pub fn run(root: &Path, project: &str, message: &str) -> CommandResult<()> {
    if message.trim().is_empty() {
        return Err("snapshot message must not be empty".into());
    }
    let (repo, store) = open_project(root, project, false)?;
    let id = SnapshotManager::new(Arc::clone(&store)).create_snapshot(message)?;
    repo.close(&store)?;
    println!("{id}");
    Ok(())
}
