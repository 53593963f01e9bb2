//! Restore command implementation.

use super::{open_project, resolve_change, CommandResult};
use std::path::Path;
use std::sync::Arc;
use vfsync_core::{RestoreReport, SnapshotManager};

/// Restores `reference` in the project, after an automatic safety snapshot.
pub fn restore(root: &Path, project: &str, reference: &str) -> CommandResult<RestoreReport> {
    let (repo, store) = open_project(root, project, false)?;
    let id = resolve_change(&store, reference)?;
    let report = SnapshotManager::new(Arc::clone(&store)).restore_snapshot(&id)?;
    repo.close(&store)?;
    Ok(report)
}

/// Runs the restore command.
pub fn run(root: &Path, project: &str, reference: &str) -> CommandResult<()> {
    let report = restore(root, project, reference)?;
    println!("Restored {} ({} patches)", report.restored.short(), report.patches);
    println!("Safety snapshot: {}", report.safety_snapshot);
    Ok(())
}
