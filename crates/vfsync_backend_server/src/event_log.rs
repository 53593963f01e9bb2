//! Bounded log of file events served to push-based watchers.

use parking_lot::RwLock;
use std::collections::{BTreeMap, VecDeque};
use vfsync_protocol::{is_under, WatchEvent};

struct Entries {
    events: VecDeque<(u64, WatchEvent)>,
    next_sequence: u64,
    /// Highest sequence number dropped for capacity, 0 if none.
    evicted_through: u64,
}

/// What [`EventLog::since`] found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBatch {
    /// Matching events in order.
    pub events: Vec<WatchEvent>,
    /// Cursor to pass next time.
    pub cursor: u64,
    /// Events after the requested cursor were already evicted.
    pub overflowed: bool,
}

/// File events in commit order, each tagged with a sequence number.
///
/// Sequence numbers start at 1; cursor 0 means "nothing seen yet". When
/// the log is full the oldest events are dropped, and readers whose cursor
/// predates them are told so.
pub struct EventLog {
    entries: RwLock<Entries>,
    capacity: usize,
}

impl EventLog {
    /// Creates an empty log holding at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(Entries {
                events: VecDeque::new(),
                next_sequence: 1,
                evicted_through: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Sequence number of the latest event, 0 if none.
    pub fn cursor(&self) -> u64 {
        self.entries.read().next_sequence - 1
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.entries.read().events.len()
    }

    /// Whether no events are retained.
    pub fn is_empty(&self) -> bool {
        self.entries.read().events.is_empty()
    }

    /// Appends an event; empty path lists are dropped.
    pub fn record(&self, event: WatchEvent) -> Option<u64> {
        if event.paths.is_empty() {
            return None;
        }
        let mut entries = self.entries.write();
        let sequence = entries.next_sequence;
        entries.next_sequence += 1;
        entries.events.push_back((sequence, event));
        while entries.events.len() > self.capacity {
            if let Some((dropped, _)) = entries.events.pop_front() {
                entries.evicted_through = dropped;
            }
        }
        Some(sequence)
    }

    /// Records the differences between two fingerprint maps, one event per
    /// non-empty kind.
    pub fn record_diff<V: PartialEq>(
        &self,
        previous: &BTreeMap<String, V>,
        current: &BTreeMap<String, V>,
    ) -> usize {
        WatchEvent::diff(previous, current)
            .into_iter()
            .filter_map(|event| self.record(event))
            .count()
    }

    /// Events after `cursor` restricted to `selector` prefixes. A cursor at
    /// or past the end returns nothing.
    pub fn since(&self, cursor: u64, selector: &[String]) -> EventBatch {
        let entries = self.entries.read();
        let events = entries
            .events
            .iter()
            .filter(|(seq, _)| *seq > cursor)
            .filter_map(|(_, event)| {
                if selector.is_empty() {
                    return Some(event.clone());
                }
                let paths: Vec<String> = event
                    .paths
                    .iter()
                    .filter(|p| selector.iter().any(|s| is_under(p, s)))
                    .cloned()
                    .collect();
                (!paths.is_empty()).then(|| WatchEvent::new(event.kind, paths))
            })
            .collect();
        EventBatch {
            events,
            cursor: entries.next_sequence - 1,
            overflowed: cursor < entries.evicted_through,
        }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfsync_protocol::WatchEventKind;

    fn map(pairs: &[(&str, u8)]) -> BTreeMap<String, u8> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    #[test]
    fn cursor_tracks_latest_event() {
        let log = EventLog::new(10);
        assert_eq!(log.cursor(), 0);
        assert!(log.record(WatchEvent::new(WatchEventKind::Add, vec![])).is_none());
        assert_eq!(log.record(WatchEvent::new(WatchEventKind::Add, vec!["/a".into()])), Some(1));
        assert_eq!(log.cursor(), 1);

        let batch = log.since(0, &[]);
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.cursor, 1);
        assert!(!batch.overflowed);
        assert!(log.since(1, &[]).events.is_empty());
        let caught_up = log.since(u64::MAX, &[]);
        assert!(caught_up.events.is_empty() && !caught_up.overflowed);
        assert_eq!(caught_up.cursor, 1);
    }

    #[test]
    fn diff_records_one_event_per_kind() {
        let log = EventLog::default();
        let recorded = log.record_diff(&map(&[("/a", 1), ("/b", 1)]), &map(&[("/a", 2), ("/c", 1)]));
        assert_eq!(recorded, 3);
        let events = log.since(0, &[]).events;
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![WatchEventKind::Add, WatchEventKind::Change, WatchEventKind::Remove]
        );
    }

    #[test]
    fn selector_filters_paths() {
        let log = EventLog::default();
        log.record(WatchEvent::new(
            WatchEventKind::Change,
            vec!["/src/a.js".into(), "/docs/x.md".into()],
        ));
        let events = log.since(0, &["/src".to_string()]).events;
        assert_eq!(events[0].paths, vec!["/src/a.js".to_string()]);
        assert!(log.since(0, &["/lib".to_string()]).events.is_empty());
    }

    #[test]
    fn capacity_drops_oldest() {
        let log = EventLog::new(2);
        for path in ["/a", "/b", "/c"] {
            log.record(WatchEvent::new(WatchEventKind::Add, vec![path.into()]));
        }
        assert_eq!(log.len(), 2);
        let batch = log.since(0, &[]);
        assert_eq!(batch.events[0].paths, vec!["/b".to_string()]);
        assert_eq!(batch.cursor, 3);
        assert!(batch.overflowed);
    }

    #[test]
    fn readers_past_the_eviction_do_not_overflow() {
        let log = EventLog::new(2);
        for path in ["/a", "/b", "/c", "/d"] {
            log.record(WatchEvent::new(WatchEventKind::Add, vec![path.into()]));
        }
        assert!(log.since(1, &[]).overflowed);
        let batch = log.since(2, &[]);
        assert!(!batch.overflowed);
        assert_eq!(batch.events.len(), 2);
        assert!(!log.since(4, &[]).overflowed);
    }
}
