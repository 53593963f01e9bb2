//! Configuration for the sync engine.

use std::time::Duration;
use vfsync_core::MANIFEST_PATH;
use vfsync_protocol::{is_under, normalize_path, MAX_FRAME_SIZE};

/// Interval between two polls of a poll-based watcher.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Prefixes never mirrored by default.
pub const DEFAULT_EXCLUDED_PREFIXES: &[&str] = &["/node_modules", "/.git", "/dist", "/.cache"];

/// Configuration for [`SyncOrchestrator`](crate::SyncOrchestrator).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Connection attempts per start or restart.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
    /// Canonical path prefixes that are never mirrored.
    pub excluded_prefixes: Vec<String>,
    /// Path of the dependency manifest.
    pub manifest_path: String,
    /// Prefixes passed to `watch_files`.
    pub watch_selector: Vec<String>,
    /// Sleep between sync passes in [`run`](crate::SyncOrchestrator::run).
    pub poll_interval: Duration,
    /// Side-effect-free command used by `ping`.
    pub ping_command: String,
}

impl OrchestratorConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            excluded_prefixes: DEFAULT_EXCLUDED_PREFIXES
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
            manifest_path: MANIFEST_PATH.to_string(),
            watch_selector: vec!["/".to_string()],
            poll_interval: DEFAULT_POLL_INTERVAL,
            ping_command: "echo ping".to_string(),
        }
    }

    /// Sets the number of connection attempts (at least one).
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    /// Sets the delay between connection attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Replaces the exclusion list.
    pub fn with_excluded_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.excluded_prefixes = prefixes
            .into_iter()
            .map(|p| normalize_path(p.as_ref()))
            .collect();
        self
    }

    /// Sets the manifest path.
    pub fn with_manifest_path(mut self, path: impl AsRef<str>) -> Self {
        self.manifest_path = normalize_path(path.as_ref());
        self
    }

    /// Sets the watch selector.
    pub fn with_watch_selector(mut self, selector: Vec<String>) -> Self {
        self.watch_selector = selector;
        self
    }

    /// Sets the run-loop interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the ping command.
    pub fn with_ping_command(mut self, command: impl Into<String>) -> Self {
        self.ping_command = command.into();
        self
    }

    /// Whether `path` lies under an excluded prefix.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded_prefixes.iter().any(|p| is_under(path, p))
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for [`RemoteAdapter`](crate::RemoteAdapter) and its channels.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Time to wait for a single response.
    pub request_timeout: Duration,
    /// Largest frame accepted from the backend.
    pub max_frame_size: usize,
}

impl RemoteConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the frame limit.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self::new()
    }
}
