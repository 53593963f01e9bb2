//! Request dispatch for the backend.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::event_log::EventLog;
use crate::workspace::{Fingerprint, Workspace};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use vfsync_protocol::{normalize_path, BackendRequest, BackendResponse, PROTOCOL_VERSION};

/// Serves [`BackendRequest`]s against a [`Workspace`].
///
/// Every request that may touch the disk is followed by a rescan, and the
/// differences land in the [`EventLog`] read by `WatchEvents`. Edits made
/// to the directory by other programs are picked up by the rescan that
/// precedes each `WatchEvents` answer.
pub struct BackendHandler {
    config: ServerConfig,
    workspace: Workspace,
    events: EventLog,
    fingerprints: Mutex<BTreeMap<String, Fingerprint>>,
    sessions: RwLock<BTreeSet<String>>,
}

impl BackendHandler {
    /// Opens the configured workspace and takes the baseline scan.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let workspace = Workspace::open(&config.workspace_root)?;
        let fingerprints = workspace.scan(&config.scan_excludes)?;
        tracing::debug!(
            root = %workspace.root().display(),
            files = fingerprints.len(),
            "workspace opened"
        );
        Ok(Self {
            events: EventLog::new(config.event_log_capacity),
            config,
            workspace,
            fingerprints: Mutex::new(fingerprints),
            sessions: RwLock::new(BTreeSet::new()),
        })
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The served workspace.
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// The event log.
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Sessions that said hello and have not said goodbye.
    pub fn sessions(&self) -> Vec<String> {
        self.sessions.read().iter().cloned().collect()
    }

    /// Ends a session, as a `Goodbye` or a dropped connection does.
    pub fn end_session(&self, session: &str) {
        if self.sessions.write().remove(session) {
            tracing::debug!(session, "session closed");
        }
    }

    /// Handles a request; failures become [`BackendResponse::Error`].
    pub fn handle(&self, request: BackendRequest) -> BackendResponse {
        let name = request.name();
        match self.try_handle(request) {
            Ok(response) => response,
            Err(err) => {
                if err.is_server_error() {
                    tracing::error!(request = name, error = %err, "request failed");
                } else {
                    tracing::debug!(request = name, error = %err, "request rejected");
                }
                BackendResponse::Error {
                    message: err.to_string(),
                }
            }
        }
    }

    /// Handles a request.
    pub fn try_handle(&self, request: BackendRequest) -> ServerResult<BackendResponse> {
        tracing::trace!(request = request.name(), "handling request");
        let response = match request {
            BackendRequest::Hello { session, version } => {
                if version != PROTOCOL_VERSION {
                    return Err(ServerError::ProtocolMismatch {
                        server: PROTOCOL_VERSION,
                        client: version,
                    });
                }
                if session.is_empty() {
                    return Err(ServerError::InvalidRequest("empty session id".into()));
                }
                tracing::info!(session = %session, "session opened");
                self.sessions.write().insert(session);
                BackendResponse::Done
            }
            BackendRequest::Goodbye { session } => {
                self.end_session(&session);
                BackendResponse::Done
            }
            BackendRequest::Ping => BackendResponse::Pong,
            BackendRequest::ReadFile { path } => BackendResponse::File(self.workspace.read(&path)?),
            BackendRequest::WriteFile { path, content } => {
                let outcome = self.workspace.write(&path, &content)?;
                self.rescan()?;
                BackendResponse::Written(outcome)
            }
            BackendRequest::RunCommand { command } => {
                if command.trim().is_empty() {
                    return Err(ServerError::InvalidRequest("empty command".into()));
                }
                let output = self.workspace.run(&command, self.config.command_timeout)?;
                self.rescan()?;
                BackendResponse::Command(output)
            }
            BackendRequest::ListFiles { dir } => BackendResponse::Entries(self.workspace.list(&dir)?),
            BackendRequest::StatFile { path } => BackendResponse::Stat(self.workspace.stat(&path)?),
            BackendRequest::RenameFile { from, to } => {
                let outcome = self.workspace.rename(&from, &to)?;
                self.rescan()?;
                BackendResponse::Written(outcome)
            }
            BackendRequest::DeleteFiles { path } => {
                let outcome = self.workspace.delete(&path)?;
                self.rescan()?;
                BackendResponse::Written(outcome)
            }
            BackendRequest::DownloadFiles { path } => {
                BackendResponse::Artifact(self.workspace.bundle(&path)?)
            }
            BackendRequest::CreateDirectory { path } => {
                self.workspace.create_dir(&path)?;
                BackendResponse::Done
            }
            BackendRequest::WatchEvents { cursor, selector } => {
                self.rescan()?;
                let selector: Vec<String> = selector.iter().map(|s| normalize_path(s)).collect();
                let batch = self.events.since(cursor, &selector);
                if batch.overflowed {
                    tracing::warn!(cursor, latest = batch.cursor, "watcher fell behind the event log");
                }
                BackendResponse::Events {
                    events: batch.events,
                    cursor: batch.cursor,
                    overflowed: batch.overflowed,
                }
            }
        };
        Ok(response)
    }

    /// Compares the disk against the last scan and records the differences.
    pub fn rescan(&self) -> ServerResult<usize> {
        let mut fingerprints = self.fingerprints.lock();
        let current = self.workspace.scan(&self.config.scan_excludes)?;
        let recorded = self.events.record_diff(&fingerprints, &current);
        if recorded > 0 {
            tracing::debug!(events = recorded, cursor = self.events.cursor(), "workspace changed");
        }
        *fingerprints = current;
        Ok(recorded)
    }

    /// Wraps the handler as a plain request function.
    pub fn into_fn(self: Arc<Self>) -> impl Fn(BackendRequest) -> BackendResponse + Send + Sync {
        move |request| self.handle(request)
    }
}

impl std::fmt::Debug for BackendHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandler")
            .field("root", &self.workspace.root())
            .field("cursor", &self.events.cursor())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vfsync_protocol::{FileContent, WatchEventKind, WriteOutcome};

    fn create_handler() -> (TempDir, BackendHandler) {
        let dir = TempDir::new().unwrap();
        let handler = BackendHandler::new(ServerConfig::new(dir.path())).unwrap();
        (dir, handler)
    }

    fn hello(handler: &BackendHandler) {
        let response = handler.handle(BackendRequest::Hello {
            session: "s1".into(),
            version: PROTOCOL_VERSION,
        });
        assert_eq!(response, BackendResponse::Done);
    }

    fn write(handler: &BackendHandler, path: &str, text: &str) -> BackendResponse {
        handler.handle(BackendRequest::WriteFile {
            path: path.into(),
            content: FileContent::from(text),
        })
    }

    #[test]
    fn hello_success() {
        let (_dir, handler) = create_handler();
        hello(&handler);
        assert_eq!(handler.sessions(), vec!["s1".to_string()]);
        handler.end_session("s1");
        assert!(handler.sessions().is_empty());
    }

    #[test]
    fn goodbye_closes_the_named_session() {
        let (_dir, handler) = create_handler();
        hello(&handler);
        let response = handler.handle(BackendRequest::Goodbye {
            session: "s1".into(),
        });
        assert_eq!(response, BackendResponse::Done);
        assert!(handler.sessions().is_empty());
    }

    #[test]
    fn lagging_watchers_are_told_they_overflowed() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::new(dir.path()).with_event_log_capacity(2);
        let handler = BackendHandler::new(config).unwrap();
        for name in ["/a", "/b", "/c"] {
            write(&handler, name, "x");
        }

        let BackendResponse::Events { events, cursor, overflowed } =
            handler.handle(BackendRequest::WatchEvents {
                cursor: 0,
                selector: vec![],
            })
        else {
            panic!("expected events");
        };
        assert!(overflowed);
        assert_eq!(events.len(), 2);
        assert_eq!(cursor, 3);

        let BackendResponse::Events { overflowed, .. } = handler.handle(BackendRequest::WatchEvents {
            cursor,
            selector: vec![],
        }) else {
            panic!("expected events");
        };
        assert!(!overflowed);
    }

    #[test]
    fn hello_bad_version() {
        let (_dir, handler) = create_handler();
        let response = handler.handle(BackendRequest::Hello {
            session: "s1".into(),
            version: 99,
        });
        assert!(matches!(response, BackendResponse::Error { .. }));
    }

    #[test]
    fn write_then_read() {
        let (_dir, handler) = create_handler();
        hello(&handler);
        assert_eq!(
            write(&handler, "/src/a.js", "A"),
            BackendResponse::Written(WriteOutcome::Applied)
        );
        assert_eq!(
            handler.handle(BackendRequest::ReadFile {
                path: "/src/a.js".into()
            }),
            BackendResponse::File(Some(FileContent::from("A")))
        );
        assert_eq!(handler.handle(BackendRequest::Ping), BackendResponse::Pong);
    }

    #[test]
    fn mutations_are_reported_to_watchers() {
        let (_dir, handler) = create_handler();
        write(&handler, "/a.txt", "1");
        write(&handler, "/a.txt", "2");
        handler.handle(BackendRequest::DeleteFiles {
            path: "/a.txt".into(),
        });

        let BackendResponse::Events { events, cursor, .. } = handler.handle(BackendRequest::WatchEvents {
            cursor: 0,
            selector: vec![],
        }) else {
            panic!("expected events");
        };
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![WatchEventKind::Add, WatchEventKind::Change, WatchEventKind::Remove]
        );
        assert_eq!(cursor, 3);

        let BackendResponse::Events { events, .. } = handler.handle(BackendRequest::WatchEvents {
            cursor,
            selector: vec![],
        }) else {
            panic!("expected events");
        };
        assert!(events.is_empty());
    }

    #[test]
    fn external_edits_are_found_by_watch_polls() {
        let (dir, handler) = create_handler();
        std::fs::write(dir.path().join("outside.txt"), "x").unwrap();
        let BackendResponse::Events { events, .. } = handler.handle(BackendRequest::WatchEvents {
            cursor: 0,
            selector: vec!["/".into()],
        }) else {
            panic!("expected events");
        };
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].paths, vec!["/outside.txt".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn commands_see_and_change_the_workspace() {
        let (_dir, handler) = create_handler();
        write(&handler, "/in.txt", "data");
        let BackendResponse::Command(output) = handler.handle(BackendRequest::RunCommand {
            command: "cat in.txt > out.txt && echo done".into(),
        }) else {
            panic!("expected command output");
        };
        assert!(output.success());
        assert_eq!(output.output.trim(), "done");
        assert_eq!(
            handler.handle(BackendRequest::ReadFile {
                path: "/out.txt".into()
            }),
            BackendResponse::File(Some(FileContent::from("data")))
        );
    }

    #[test]
    fn empty_command_is_rejected() {
        let (_dir, handler) = create_handler();
        let response = handler.handle(BackendRequest::RunCommand {
            command: "  ".into(),
        });
        assert!(matches!(response, BackendResponse::Error { .. }));
    }
}
