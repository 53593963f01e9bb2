//! Change feed for observing committed document changes.
//!
//! Every commit of the [`VersionedDocumentStore`](crate::VersionedDocumentStore)
//! emits exactly one [`DocumentEvent`] after the new projection is
//! published. Consumers include:
//! - the undo/redo manager (head transitions)
//! - the sync orchestrator (outbound mirroring)
//! - the dependency manifest manager (manifest re-derivation)
//!
//! Subscribers receive events over `std::sync::mpsc`; late readers catch up
//! with [`ChangeFeed::poll`].

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use vfsync_protocol::{ChangeId, Heads, Key};

/// Identifies one undo/redo manager.
///
/// The manager threads its token through the changes it makes so it can
/// recognise, and skip, its own edits when observing the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuardToken(u64);

impl GuardToken {
    /// Mints a token unique within the process.
    #[must_use]
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for GuardToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Who caused a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// A local edit.
    Local,
    /// Folded in from a backend or another replica.
    Remote,
    /// A snapshot restore.
    Restore,
    /// A snapshot stamp.
    Snapshot,
    /// An undo or redo performed by the manager holding this token.
    UndoRedo(GuardToken),
}

impl Origin {
    /// Whether the change should be mirrored to the active backend.
    #[must_use]
    pub const fn is_outbound(&self) -> bool {
        !matches!(self, Self::Remote)
    }
}

/// One committed transition of the document heads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEvent {
    /// Feed sequence number, starting at 1.
    pub sequence: u64,
    /// Changes added by the commit, in application order.
    pub changes: Vec<ChangeId>,
    /// Heads before the commit.
    pub before: Heads,
    /// Heads after the commit.
    pub after: Heads,
    /// Who caused it.
    pub origin: Origin,
    /// Keys whose value may differ between `before` and `after`.
    pub changed_keys: BTreeSet<Key>,
}

impl DocumentEvent {
    /// Changed file paths.
    pub fn changed_files(&self) -> impl Iterator<Item = &str> + '_ {
        self.changed_keys.iter().filter_map(Key::as_file)
    }
}

/// Distributes committed document events to subscribers.
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<DocumentEvent>>>,
    history: RwLock<Vec<DocumentEvent>>,
    next_sequence: AtomicU64,
    max_history: usize,
}

impl ChangeFeed {
    /// Creates a feed keeping the last `max_history` events.
    #[must_use]
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            next_sequence: AtomicU64::new(1),
            max_history,
        }
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Receiver<DocumentEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Stamps and publishes an event. Returns its sequence number.
    pub(crate) fn emit(
        &self,
        changes: Vec<ChangeId>,
        before: Heads,
        after: Heads,
        origin: Origin,
        changed_keys: BTreeSet<Key>,
    ) -> u64 {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let event = DocumentEvent {
            sequence,
            changes,
            before,
            after,
            origin,
            changed_keys,
        };

        {
            let mut history = self.history.write();
            history.push(event.clone());
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(..excess);
            }
        }

        self.subscribers
            .write()
            .retain(|tx| tx.send(event.clone()).is_ok());
        sequence
    }

    /// Events with sequence greater than `cursor`, at most `limit`.
    #[must_use]
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<DocumentEvent> {
        self.history
            .read()
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Sequence number of the last emitted event, or 0.
    #[must_use]
    pub fn latest_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::SeqCst) - 1
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::with_max_history(1024)
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("latest_sequence", &self.latest_sequence())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
