//! Poll-based file watching.
//!
//! Each tick takes a full snapshot of the watched mapping and compares it
//! with the previous one, so a tick costs O(file count).

use crate::adapter::FileWatcher;
use crate::error::SyncResult;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use vfsync_protocol::{is_under, WatchEvent};

type SnapshotFn = Box<dyn Fn() -> BTreeMap<String, String> + Send>;

/// Watches a mapping by snapshotting it at most once per interval.
pub struct PollWatcher {
    source: SnapshotFn,
    selector: Vec<String>,
    previous: BTreeMap<String, String>,
    interval: Duration,
    last_tick: Instant,
}

impl PollWatcher {
    /// Starts watching. The current contents form the baseline and are not
    /// reported.
    pub fn new<F>(source: F, selector: &[String], interval: Duration) -> Self
    where
        F: Fn() -> BTreeMap<String, String> + Send + 'static,
    {
        let mut watcher = Self {
            source: Box::new(source),
            selector: selector.to_vec(),
            previous: BTreeMap::new(),
            interval,
            last_tick: Instant::now(),
        };
        watcher.previous = watcher.snapshot();
        watcher
    }

    fn snapshot(&self) -> BTreeMap<String, String> {
        let mut files = (self.source)();
        if !self.selector.is_empty() {
            files.retain(|path, _| self.selector.iter().any(|s| is_under(path, s)));
        }
        files
    }

    /// Snapshots now regardless of the interval.
    pub fn tick(&mut self) -> Vec<WatchEvent> {
        self.last_tick = Instant::now();
        let current = self.snapshot();
        let events = WatchEvent::diff(&self.previous, &current);
        self.previous = current;
        events
    }

    /// Poll interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl FileWatcher for PollWatcher {
    fn poll_events(&mut self) -> SyncResult<Vec<WatchEvent>> {
        if self.last_tick.elapsed() < self.interval {
            return Ok(Vec::new());
        }
        Ok(self.tick())
    }
}

impl std::fmt::Debug for PollWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollWatcher")
            .field("selector", &self.selector)
            .field("files", &self.previous.len())
            .field("interval", &self.interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use vfsync_protocol::WatchEventKind;
    use std::sync::Arc;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn watcher_reports_only_new_changes() {
        let files = Arc::new(Mutex::new(map(&[("/src/a.js", "1")])));
        let source = Arc::clone(&files);
        let mut watcher =
            PollWatcher::new(move || source.lock().clone(), &["/src".to_string()], Duration::ZERO);

        assert!(watcher.poll_events().unwrap().is_empty());
        files.lock().insert("/src/b.js".into(), "2".into());
        files.lock().insert("/other.txt".into(), "x".into());
        let events = watcher.poll_events().unwrap();
        assert_eq!(events, vec![WatchEvent::new(WatchEventKind::Add, vec!["/src/b.js".into()])]);
        assert!(watcher.poll_events().unwrap().is_empty());
    }

    #[test]
    fn interval_throttles_polls() {
        let mut watcher = PollWatcher::new(BTreeMap::new, &[], Duration::from_secs(3600));
        assert!(watcher.poll_events().unwrap().is_empty());
        assert_eq!(watcher.interval(), Duration::from_secs(3600));
    }
}
