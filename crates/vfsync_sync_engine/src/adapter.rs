//! The provider adapter contract.
//!
//! A provider is an execution backend holding a copy of the project's files:
//! an in-memory emulation ([`VirtualAdapter`](crate::VirtualAdapter)) or a
//! real workspace reached over a session channel
//! ([`RemoteAdapter`](crate::RemoteAdapter)). Calls are synchronous; long
//! operations are bounded by the adapter's own timeout.

use crate::error::SyncResult;
use std::collections::BTreeMap;
use std::sync::Arc;
use vfsync_protocol::{
    normalize_path, ArtifactLocator, CommandOutput, DirEntry, EntryKind, FileContent, FileStat,
    WatchEvent, WriteOutcome,
};

/// Connection state of an adapter session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session.
    #[default]
    Disconnected,
    /// Connection in progress.
    Connecting,
    /// Session open.
    Connected,
}

/// Session bookkeeping kept by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterSession {
    /// Current state.
    pub state: SessionState,
    /// Failed attempts since the last successful connection.
    pub retry_count: u32,
    /// Session id passed to `connect`.
    pub session_id: Option<String>,
}

/// A handle returned by [`ProviderAdapter::watch_files`].
///
/// Polling never blocks; an empty vector means nothing changed.
pub trait FileWatcher: Send {
    /// Returns the events observed since the previous call.
    fn poll_events(&mut self) -> SyncResult<Vec<WatchEvent>>;
}

/// Capability set of an execution backend.
///
/// Paths are canonicalized by the adapter. Absence is reported as `None`,
/// never as an error. Content a backend cannot hold is declined with
/// [`WriteOutcome::Ignored`].
pub trait ProviderAdapter: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Opens a session.
    fn connect(&self, session_id: &str) -> SyncResult<()>;

    /// Re-establishes the current session without recreating the backend.
    fn reconnect(&self) -> SyncResult<()>;

    /// Closes the session.
    fn disconnect(&self) -> SyncResult<()>;

    /// Whether a session is open.
    fn is_connected(&self) -> bool;

    /// Reads a file.
    fn read_file(&self, path: &str) -> SyncResult<Option<FileContent>>;

    /// Writes a file, creating parent directories as needed.
    fn write_file(&self, path: &str, content: FileContent) -> SyncResult<WriteOutcome>;

    /// Runs a shell command.
    fn run_command(&self, command: &str) -> SyncResult<CommandOutput>;

    /// Lists the direct children of a directory.
    fn list_files(&self, dir: &str) -> SyncResult<Vec<DirEntry>>;

    /// Stats a path.
    fn stat_file(&self, path: &str) -> SyncResult<Option<FileStat>>;

    /// Moves a file, or every file below a directory.
    fn rename_file(&self, from: &str, to: &str) -> SyncResult<WriteOutcome>;

    /// Deletes a file, or every file below a directory.
    fn delete_files(&self, path: &str) -> SyncResult<WriteOutcome>;

    /// Packages a path for download.
    fn download_files(&self, path: &str) -> SyncResult<ArtifactLocator>;

    /// Creates a directory.
    fn create_directory(&self, path: &str) -> SyncResult<()>;

    /// Starts watching paths under `selector`.
    fn watch_files(&self, selector: &[String]) -> SyncResult<Box<dyn FileWatcher>>;

    /// Every file below `dir`, skipping subtrees for which `skip` is true.
    fn collect_files(
        &self,
        dir: &str,
        skip: &dyn Fn(&str) -> bool,
    ) -> SyncResult<BTreeMap<String, FileContent>> {
        let mut files = BTreeMap::new();
        let mut pending = vec![normalize_path(dir)];
        while let Some(dir) = pending.pop() {
            for entry in self.list_files(&dir)? {
                let path = normalize_path(&format!("{dir}/{}", entry.name));
                if skip(&path) {
                    continue;
                }
                match entry.kind {
                    EntryKind::Directory => pending.push(path),
                    EntryKind::File => {
                        if let Some(content) = self.read_file(&path)? {
                            files.insert(path, content);
                        }
                    }
                }
            }
        }
        Ok(files)
    }
}

/// Creates fresh adapters; used on first start and on a full restart.
pub trait ProviderFactory: Send + Sync {
    /// Builds an adapter with no open session.
    fn create(&self) -> SyncResult<Arc<dyn ProviderAdapter>>;
}

impl<F> ProviderFactory for F
where
    F: Fn() -> SyncResult<Arc<dyn ProviderAdapter>> + Send + Sync,
{
    fn create(&self) -> SyncResult<Arc<dyn ProviderAdapter>> {
        self()
    }
}
