//! Provider forwarding every call to a real backend over a session channel.

use crate::adapter::{FileWatcher, ProviderAdapter};
use crate::channel::{LoopbackChannel, RequestHandlerFn, SessionChannel, TcpChannel, ThreadChannel};
use crate::config::RemoteConfig;
use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use std::sync::Arc;
use vfsync_protocol::{
    normalize_path, ArtifactLocator, BackendRequest, BackendResponse, CommandOutput, DirEntry,
    FileContent, FileStat, WatchEvent, WriteOutcome, PROTOCOL_VERSION,
};

type Connector = Arc<dyn Fn() -> SyncResult<Arc<dyn SessionChannel>> + Send + Sync>;

fn unexpected(request: &str, response: &BackendResponse) -> SyncError {
    SyncError::Protocol(format!("unexpected response to {request}: {response:?}"))
}

fn call(channel: &dyn SessionChannel, request: BackendRequest) -> SyncResult<BackendResponse> {
    let name = request.name();
    match channel.call(request)? {
        BackendResponse::Error { message } => {
            tracing::debug!(request = name, error = %message, "backend rejected request");
            Err(SyncError::Backend(message))
        }
        response => Ok(response),
    }
}

/// A provider backed by a remote workspace.
///
/// Each `connect` opens a fresh channel through the connector and
/// introduces the session with a `Hello`. Channel failures surface as
/// retryable transport errors.
pub struct RemoteAdapter {
    connector: Connector,
    channel: RwLock<Option<Arc<dyn SessionChannel>>>,
    session: RwLock<Option<String>>,
}

impl RemoteAdapter {
    /// Creates an adapter opening channels with `connector`.
    pub fn new<F>(connector: F) -> Self
    where
        F: Fn() -> SyncResult<Arc<dyn SessionChannel>> + Send + Sync + 'static,
    {
        Self {
            connector: Arc::new(connector),
            channel: RwLock::new(None),
            session: RwLock::new(None),
        }
    }

    /// Adapter calling an in-process handler directly.
    pub fn loopback(handler: RequestHandlerFn) -> Self {
        Self::new(move || {
            let channel: Arc<dyn SessionChannel> = Arc::new(LoopbackChannel::new(Arc::clone(&handler)));
            Ok(channel)
        })
    }

    /// Adapter running an in-process handler on a worker thread.
    pub fn worker(handler: RequestHandlerFn, config: RemoteConfig) -> Self {
        Self::new(move || {
            let channel: Arc<dyn SessionChannel> =
                Arc::new(ThreadChannel::spawn(Arc::clone(&handler), &config)?);
            Ok(channel)
        })
    }

    /// Adapter talking to a backend server over TCP.
    pub fn tcp(addr: impl Into<String>, config: RemoteConfig) -> Self {
        let addr = addr.into();
        Self::new(move || {
            let channel: Arc<dyn SessionChannel> =
                Arc::new(TcpChannel::connect(addr.as_str(), &config)?);
            Ok(channel)
        })
    }

    fn channel(&self) -> SyncResult<Arc<dyn SessionChannel>> {
        self.channel.read().clone().ok_or(SyncError::NotConnected)
    }

    fn request(&self, request: BackendRequest) -> SyncResult<BackendResponse> {
        let channel = self.channel()?;
        call(channel.as_ref(), request)
    }

    fn hello(channel: &dyn SessionChannel, session: &str) -> SyncResult<()> {
        let request = BackendRequest::Hello {
            session: session.to_string(),
            version: PROTOCOL_VERSION,
        };
        match call(channel, request)? {
            BackendResponse::Done => Ok(()),
            other => Err(unexpected("hello", &other)),
        }
    }

    fn written(&self, name: &str, request: BackendRequest) -> SyncResult<WriteOutcome> {
        match self.request(request)? {
            BackendResponse::Written(outcome) => Ok(outcome),
            BackendResponse::Done => Ok(WriteOutcome::Applied),
            other => Err(unexpected(name, &other)),
        }
    }
}

impl std::fmt::Debug for RemoteAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAdapter")
            .field("session", &*self.session.read())
            .field("connected", &self.channel.read().is_some())
            .finish()
    }
}

impl ProviderAdapter for RemoteAdapter {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn connect(&self, session_id: &str) -> SyncResult<()> {
        let channel = (self.connector)()?;
        if let Err(err) = Self::hello(channel.as_ref(), session_id) {
            channel.close();
            return Err(err);
        }
        if let Some(old) = self.channel.write().replace(channel) {
            old.close();
        }
        *self.session.write() = Some(session_id.to_string());
        tracing::info!(session = session_id, "remote session opened");
        Ok(())
    }

    fn reconnect(&self) -> SyncResult<()> {
        let session = self.session.read().clone().ok_or(SyncError::NotConnected)?;
        let channel = self.channel()?;
        Self::hello(channel.as_ref(), &session)
    }

    fn disconnect(&self) -> SyncResult<()> {
        let Some(channel) = self.channel.write().take() else {
            return Ok(());
        };
        let session = self.session.read().clone().unwrap_or_default();
        let result = call(channel.as_ref(), BackendRequest::Goodbye { session }).map(|_| ());
        channel.close();
        if let Err(err) = &result {
            tracing::debug!(error = %err, "goodbye failed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.channel.read().is_some()
    }

    fn read_file(&self, path: &str) -> SyncResult<Option<FileContent>> {
        let path = normalize_path(path);
        match self.request(BackendRequest::ReadFile { path })? {
            BackendResponse::File(content) => Ok(content),
            other => Err(unexpected("read_file", &other)),
        }
    }

    fn write_file(&self, path: &str, content: FileContent) -> SyncResult<WriteOutcome> {
        let path = normalize_path(path);
        self.written("write_file", BackendRequest::WriteFile { path, content })
    }

    fn run_command(&self, command: &str) -> SyncResult<CommandOutput> {
        let command = command.to_string();
        match self.request(BackendRequest::RunCommand { command })? {
            BackendResponse::Command(output) => Ok(output),
            other => Err(unexpected("run_command", &other)),
        }
    }

    fn list_files(&self, dir: &str) -> SyncResult<Vec<DirEntry>> {
        let dir = normalize_path(dir);
        match self.request(BackendRequest::ListFiles { dir })? {
            BackendResponse::Entries(entries) => Ok(entries),
            other => Err(unexpected("list_files", &other)),
        }
    }

    fn stat_file(&self, path: &str) -> SyncResult<Option<FileStat>> {
        let path = normalize_path(path);
        match self.request(BackendRequest::StatFile { path })? {
            BackendResponse::Stat(stat) => Ok(stat),
            other => Err(unexpected("stat_file", &other)),
        }
    }

    fn rename_file(&self, from: &str, to: &str) -> SyncResult<WriteOutcome> {
        let request = BackendRequest::RenameFile {
            from: normalize_path(from),
            to: normalize_path(to),
        };
        self.written("rename_file", request)
    }

    fn delete_files(&self, path: &str) -> SyncResult<WriteOutcome> {
        let path = normalize_path(path);
        self.written("delete_files", BackendRequest::DeleteFiles { path })
    }

    fn download_files(&self, path: &str) -> SyncResult<ArtifactLocator> {
        let path = normalize_path(path);
        match self.request(BackendRequest::DownloadFiles { path })? {
            BackendResponse::Artifact(locator) => Ok(locator),
            other => Err(unexpected("download_files", &other)),
        }
    }

    fn create_directory(&self, path: &str) -> SyncResult<()> {
        let path = normalize_path(path);
        match self.request(BackendRequest::CreateDirectory { path })? {
            BackendResponse::Done | BackendResponse::Written(_) => Ok(()),
            other => Err(unexpected("create_directory", &other)),
        }
    }

    fn watch_files(&self, selector: &[String]) -> SyncResult<Box<dyn FileWatcher>> {
        let selector: Vec<String> = selector.iter().map(|s| normalize_path(s)).collect();
        let mut watcher = PushWatcher {
            channel: self.channel()?,
            selector,
            cursor: u64::MAX,
        };
        // Skip everything recorded before the watch started.
        watcher.poll_events()?;
        Ok(Box::new(watcher))
    }
}

/// Drains discrete events from the backend's event log.
pub struct PushWatcher {
    channel: Arc<dyn SessionChannel>,
    selector: Vec<String>,
    cursor: u64,
}

impl PushWatcher {
    /// Position in the backend's event log.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }
}

impl FileWatcher for PushWatcher {
    fn poll_events(&mut self) -> SyncResult<Vec<WatchEvent>> {
        let request = BackendRequest::WatchEvents {
            cursor: self.cursor,
            selector: self.selector.clone(),
        };
        match call(self.channel.as_ref(), request)? {
            BackendResponse::Events {
                events,
                cursor,
                overflowed,
            } => {
                let skipped = self.cursor == u64::MAX;
                self.cursor = cursor;
                if skipped {
                    Ok(Vec::new())
                } else if overflowed {
                    Err(SyncError::WatchOverflow { cursor })
                } else {
                    Ok(events)
                }
            }
            other => Err(unexpected("watch_events", &other)),
        }
    }
}
