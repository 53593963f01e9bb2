//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use vfsync_protocol::{normalize_path, MAX_FRAME_SIZE};

/// Configuration for the backend server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory holding the workspace files.
    pub workspace_root: PathBuf,
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Largest frame accepted from a client.
    pub max_frame_size: usize,
    /// Time a command may run before it is killed.
    pub command_timeout: Duration,
    /// Number of watch events retained.
    pub event_log_capacity: usize,
    /// Subtrees left out of change detection.
    pub scan_excludes: Vec<String>,
}

impl ServerConfig {
    /// Creates a configuration serving `workspace_root`.
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7420)),
            max_connections: 64,
            max_frame_size: MAX_FRAME_SIZE,
            command_timeout: Duration::from_secs(120),
            event_log_capacity: 4096,
            scan_excludes: vec!["/node_modules".to_string(), "/.git".to_string()],
        }
    }

    /// Sets the bind address.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Sets the maximum concurrent connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.max(1);
        self
    }

    /// Sets the frame limit.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Sets the command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the event log capacity.
    pub fn with_event_log_capacity(mut self, capacity: usize) -> Self {
        self.event_log_capacity = capacity.max(1);
        self
    }

    /// Replaces the scan exclusions.
    pub fn with_scan_excludes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.scan_excludes = prefixes
            .into_iter()
            .map(|p| normalize_path(p.as_ref()))
            .collect();
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("workspace")
    }
}
