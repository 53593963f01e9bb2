//! Adapter result types and the remote backend wire messages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Wire protocol version sent in [`BackendRequest::Hello`].
pub const PROTOCOL_VERSION: u16 = 1;

/// Content of a file as exchanged with a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileContent {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
}

impl FileContent {
    /// Whether the content is binary.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Text content, if any.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Raw bytes of either variant.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Interprets bytes read from disk: valid UTF-8 becomes text.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => Self::Text(text),
            Err(err) => Self::Binary(err.into_bytes()),
        }
    }
}

impl From<&str> for FileContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for FileContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Whether a listed entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// Directory.
    Directory,
    /// Regular file.
    File,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (a single path segment).
    pub name: String,
    /// Entry type.
    pub kind: EntryKind,
}

impl DirEntry {
    /// Creates a file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
        }
    }

    /// Creates a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
        }
    }
}

/// Result of `stat_file`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    /// Entry type.
    pub kind: EntryKind,
    /// Size in bytes for files.
    pub size: Option<u64>,
}

/// Output of a command run by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Combined output.
    pub output: String,
    /// Process exit code; emulated commands report 0.
    pub exit_code: i32,
}

impl CommandOutput {
    /// Successful output.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            exit_code: 0,
        }
    }

    /// Whether the command exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Where a downloaded artifact can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactLocator {
    /// Files carried inline, keyed by path relative to the requested root.
    Bundle {
        /// Canonical path that was requested.
        root: String,
        /// Contents below the root.
        files: BTreeMap<String, FileContent>,
    },
    /// A URL the caller can fetch.
    Url(String),
}

/// Category of a file watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WatchEventKind {
    /// Paths that appeared.
    Add,
    /// Paths whose content changed.
    Change,
    /// Paths that disappeared.
    Remove,
}

/// A batch of paths sharing one event kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    /// Event kind.
    pub kind: WatchEventKind,
    /// Affected canonical paths, sorted.
    pub paths: Vec<String>,
}

impl WatchEvent {
    /// Creates an event, sorting its paths.
    #[must_use]
    pub fn new(kind: WatchEventKind, mut paths: Vec<String>) -> Self {
        paths.sort();
        paths.dedup();
        Self { kind, paths }
    }

    /// Compares two path-keyed maps by key set and value.
    ///
    /// Returns at most one event per kind, in `add`, `change`, `remove`
    /// order; empty categories are left out.
    pub fn diff<V: PartialEq>(
        previous: &BTreeMap<String, V>,
        current: &BTreeMap<String, V>,
    ) -> Vec<Self> {
        let mut added = Vec::new();
        let mut changed = Vec::new();
        for (path, value) in current {
            match previous.get(path) {
                None => added.push(path.clone()),
                Some(old) if old != value => changed.push(path.clone()),
                Some(_) => {}
            }
        }
        let removed: Vec<String> = previous
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();

        [
            (WatchEventKind::Add, added),
            (WatchEventKind::Change, changed),
            (WatchEventKind::Remove, removed),
        ]
        .into_iter()
        .filter(|(_, paths)| !paths.is_empty())
        .map(|(kind, paths)| Self::new(kind, paths))
        .collect()
    }
}

/// Outcome of a mutation the backend may legitimately decline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOutcome {
    /// The mutation took effect.
    Applied,
    /// The backend cannot hold this content; nothing changed.
    Ignored {
        /// Why it was declined.
        reason: String,
    },
}

impl WriteOutcome {
    /// Whether the mutation took effect.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Requests understood by the remote backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendRequest {
    /// Opens a session.
    Hello {
        /// Session identifier.
        session: String,
        /// Client protocol version.
        version: u16,
    },
    /// Closes the session.
    Goodbye {
        /// Session identifier sent in `Hello`.
        session: String,
    },
    /// Liveness probe with no side effects.
    Ping,
    /// Reads a file.
    ReadFile {
        /// Canonical path.
        path: String,
    },
    /// Writes a file.
    WriteFile {
        /// Canonical path.
        path: String,
        /// New content.
        content: FileContent,
    },
    /// Runs a shell command in the workspace.
    RunCommand {
        /// Shell string.
        command: String,
    },
    /// Lists a directory.
    ListFiles {
        /// Canonical directory path.
        dir: String,
    },
    /// Stats a path.
    StatFile {
        /// Canonical path.
        path: String,
    },
    /// Renames a file or subtree.
    RenameFile {
        /// Source path.
        from: String,
        /// Destination path.
        to: String,
    },
    /// Deletes a file or subtree.
    DeleteFiles {
        /// Canonical path or prefix.
        path: String,
    },
    /// Packages a path for download.
    DownloadFiles {
        /// Canonical path.
        path: String,
    },
    /// Creates a directory.
    CreateDirectory {
        /// Canonical path.
        path: String,
    },
    /// Fetches file events recorded after `cursor`.
    WatchEvents {
        /// Last cursor seen by the caller.
        cursor: u64,
        /// Only report paths under these prefixes; empty means all.
        selector: Vec<String>,
    },
}

impl BackendRequest {
    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Goodbye { .. } => "goodbye",
            Self::Ping => "ping",
            Self::ReadFile { .. } => "read_file",
            Self::WriteFile { .. } => "write_file",
            Self::RunCommand { .. } => "run_command",
            Self::ListFiles { .. } => "list_files",
            Self::StatFile { .. } => "stat_file",
            Self::RenameFile { .. } => "rename_file",
            Self::DeleteFiles { .. } => "delete_files",
            Self::DownloadFiles { .. } => "download_files",
            Self::CreateDirectory { .. } => "create_directory",
            Self::WatchEvents { .. } => "watch_events",
        }
    }
}

/// Responses produced by the remote backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendResponse {
    /// Request completed with nothing to return.
    Done,
    /// Answer to [`BackendRequest::Ping`].
    Pong,
    /// File content, `None` when absent.
    File(Option<FileContent>),
    /// Outcome of a mutation.
    Written(WriteOutcome),
    /// Command output.
    Command(CommandOutput),
    /// Directory listing.
    Entries(Vec<DirEntry>),
    /// Stat result, `None` when absent.
    Stat(Option<FileStat>),
    /// Download locator.
    Artifact(ArtifactLocator),
    /// Watch events and the cursor to pass next time.
    Events {
        /// Events in order.
        events: Vec<WatchEvent>,
        /// New cursor.
        cursor: u64,
        /// Events after the requested cursor were evicted before this
        /// call, so `events` is incomplete.
        overflowed: bool,
    },
    /// The request failed on the backend.
    Error {
        /// Failure description.
        message: String,
    },
}

/// A request tagged with a correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation id echoed by the response.
    pub request_id: u64,
    /// Request body.
    pub body: BackendRequest,
}

/// A response tagged with the id of the request it answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Correlation id of the request.
    pub request_id: u64,
    /// Response body.
    pub body: BackendResponse,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{from_cbor, to_cbor};

    #[test]
    fn from_bytes_detects_binary() {
        assert_eq!(FileContent::from_bytes(b"plain".to_vec()), FileContent::from("plain"));
        assert!(FileContent::from_bytes(vec![0xff, 0xfe, 0x00]).is_binary());
    }

    #[test]
    fn watch_event_sorts_paths() {
        let event = WatchEvent::new(
            WatchEventKind::Add,
            vec!["/b".into(), "/a".into(), "/b".into()],
        );
        assert_eq!(event.paths, vec!["/a".to_string(), "/b".to_string()]);
    }

    #[test]
    fn diff_classifies_each_path_once() {
        let before: BTreeMap<String, u8> =
            [("/a", 1), ("/b", 1), ("/c", 1)].map(|(k, v)| (k.to_string(), v)).into();
        let after: BTreeMap<String, u8> =
            [("/b", 2), ("/c", 1), ("/d", 1)].map(|(k, v)| (k.to_string(), v)).into();
        assert_eq!(
            WatchEvent::diff(&before, &after),
            vec![
                WatchEvent::new(WatchEventKind::Add, vec!["/d".into()]),
                WatchEvent::new(WatchEventKind::Change, vec!["/b".into()]),
                WatchEvent::new(WatchEventKind::Remove, vec!["/a".into()]),
            ]
        );
        assert!(WatchEvent::diff(&after, &after).is_empty());
    }

    #[test]
    fn request_frame_survives_the_wire() {
        let frame = RequestFrame {
            request_id: 42,
            body: BackendRequest::WriteFile {
                path: "/img.bin".into(),
                content: FileContent::Binary(vec![0, 1, 2]),
            },
        };
        let decoded: RequestFrame = from_cbor(&to_cbor(&frame).unwrap()).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.body.name(), "write_file");
    }

    #[test]
    fn directories_list_before_files() {
        let mut entries = vec![DirEntry::file("a.js"), DirEntry::directory("z")];
        entries.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
        assert_eq!(entries[0].name, "z");
    }
}
