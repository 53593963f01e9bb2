//! The versioned document store.

use crate::change_feed::{ChangeFeed, DocumentEvent, Origin};
use crate::clock::{Clock, Stamper, SystemClock};
use crate::config::DocumentConfig;
use crate::dag::ChangeGraph;
use crate::error::{CoreError, CoreResult};
use crate::history_log::HistoryLog;
use crate::patch::{diff, touched_keys};
use crate::transaction::{Finished, Transaction};
use crate::view::DocumentView;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use std::collections::{BTreeSet, HashSet};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use vfsync_protocol::{normalize_path, ActorId, Change, ChangeId, Heads, Key, Operation, Patch, Value};

struct DocState {
    graph: ChangeGraph,
    heads: Heads,
    view: Arc<DocumentView>,
    stamper: Stamper,
    log: Option<HistoryLog>,
}

/// An event computed under the state lock, emitted after it is released.
struct PendingEvent {
    changes: Vec<ChangeId>,
    before: Heads,
    after: Heads,
    origin: Origin,
    changed: BTreeSet<Key>,
}

/// Summary of a batch merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Changes newly added, in application order.
    pub applied: Vec<ChangeId>,
    /// Changes that were already known.
    pub duplicates: usize,
    /// Parents referenced by the batch but present neither locally nor in
    /// the batch. Non-empty means a full resync is required.
    pub missing: Vec<ChangeId>,
    /// Heads after the merge.
    pub heads: Heads,
}

impl MergeReport {
    /// Whether the batch left a causal gap.
    #[must_use]
    pub fn has_gap(&self) -> bool {
        !self.missing.is_empty()
    }
}

/// A causally versioned file document.
///
/// The store owns the DAG of changes, the current heads and the projection
/// derived from them. Heads and projection are swapped together under one
/// lock, so readers never observe a projection that belongs to other heads.
///
/// Mutations are serialized: [`change`](Self::change) holds exclusive access
/// for the duration of its callback. The callback must not call back into
/// the store.
///
/// # Example
///
/// ```rust
/// use vfsync_core::{DocumentConfig, Origin, VersionedDocumentStore};
///
/// let store = VersionedDocumentStore::new(DocumentConfig::default());
/// store.change(Origin::Local, |tx| tx.put_text("/index.js", "console.log(1)")).unwrap();
/// assert_eq!(store.get_text("/index.js").as_deref(), Some("console.log(1)"));
/// ```
pub struct VersionedDocumentStore {
    config: DocumentConfig,
    clock: Arc<dyn Clock>,
    state: RwLock<DocState>,
    /// Held from the end of a write until its event is emitted, so feed
    /// sequences follow commit order.
    publishing: Mutex<()>,
    feed: ChangeFeed,
}

impl VersionedDocumentStore {
    /// Creates an empty in-memory document.
    #[must_use]
    pub fn new(config: DocumentConfig) -> Self {
        let feed = ChangeFeed::with_max_history(config.feed_history);
        Self {
            config,
            clock: Arc::new(SystemClock),
            state: RwLock::new(DocState {
                graph: ChangeGraph::new(),
                heads: Heads::new(),
                view: Arc::new(DocumentView::new()),
                stamper: Stamper::default(),
                log: None,
            }),
            publishing: Mutex::new(()),
            feed,
        }
    }

    /// Opens a document over a history log and the changes it replayed.
    ///
    /// # Errors
    ///
    /// Returns an error if a replayed change references an unknown parent
    /// or its id does not match.
    pub fn open(
        config: DocumentConfig,
        log: HistoryLog,
        changes: Vec<(ChangeId, Change)>,
    ) -> CoreResult<Self> {
        let store = Self::new(config);
        {
            let mut state = store.state.write();
            for (id, change) in changes {
                state.stamper.receive(change.timestamp_ms);
                state.graph.insert(id, Arc::new(change))?;
            }
            state.heads = state.graph.frontier();
            state.view = Arc::new(state.graph.materialize(&state.heads)?);
            state.log = Some(log);
            tracing::debug!(
                changes = state.graph.len(),
                files = state.view.len(),
                "document loaded from history"
            );
        }
        Ok(store)
    }

    /// Replaces the timestamp source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The local actor.
    #[must_use]
    pub fn actor(&self) -> ActorId {
        self.config.actor
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &DocumentConfig {
        &self.config
    }

    /// Current heads.
    #[must_use]
    pub fn heads(&self) -> Heads {
        self.state.read().heads.clone()
    }

    /// Current projection.
    #[must_use]
    pub fn view(&self) -> Arc<DocumentView> {
        Arc::clone(&self.state.read().view)
    }

    /// Heads and the projection derived from them, read atomically.
    #[must_use]
    pub fn current(&self) -> (Heads, Arc<DocumentView>) {
        let state = self.state.read();
        (state.heads.clone(), Arc::clone(&state.view))
    }

    /// Reads a file. `None` means not found.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Value> {
        self.state.read().view.file(&normalize_path(path)).cloned()
    }

    /// Reads a text file.
    #[must_use]
    pub fn get_text(&self, path: &str) -> Option<String> {
        match self.get(path)? {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Reads any leaf.
    #[must_use]
    pub fn get_key(&self, key: &Key) -> Option<Value> {
        self.state.read().view.get(key).cloned()
    }

    /// Every file path, sorted.
    #[must_use]
    pub fn file_paths(&self) -> Vec<String> {
        self.state.read().view.files().keys().cloned().collect()
    }

    /// Number of changes in the history.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.state.read().graph.len()
    }

    /// Whether `id` is in the history.
    #[must_use]
    pub fn contains_change(&self, id: &ChangeId) -> bool {
        self.state.read().graph.contains(id)
    }

    /// Looks up a change.
    #[must_use]
    pub fn get_change(&self, id: &ChangeId) -> Option<Arc<Change>> {
        self.state.read().graph.get(id).cloned()
    }

    /// Every change in deterministic topological order.
    #[must_use]
    pub fn changes(&self) -> Vec<(ChangeId, Arc<Change>)> {
        let state = self.state.read();
        state
            .graph
            .ordered()
            .into_iter()
            .filter_map(|id| state.graph.get(&id).map(|c| (id, Arc::clone(c))))
            .collect()
    }

    /// Changes not reachable from `heads`, parents first. This is what a
    /// replica at `heads` is missing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownChange`] if `heads` names an unknown change.
    pub fn changes_since(&self, heads: &Heads) -> CoreResult<Vec<Change>> {
        let state = self.state.read();
        let known = state.graph.ancestors(heads)?;
        let all: HashSet<ChangeId> = state.graph.iter().map(|(id, _)| *id).collect();
        let unseen: HashSet<ChangeId> = all.difference(&known).copied().collect();
        Ok(state
            .graph
            .topological(&unseen)
            .into_iter()
            .filter_map(|id| state.graph.get(&id).map(|c| c.as_ref().clone()))
            .collect())
    }

    /// Projection at arbitrary heads.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownChange`] if `heads` names an unknown change.
    pub fn materialize(&self, heads: &Heads) -> CoreResult<DocumentView> {
        let state = self.state.read();
        if *heads == state.heads {
            return Ok(state.view.as_ref().clone());
        }
        state.graph.materialize(heads)
    }

    /// Patches turning the projection at `from` into the one at `to`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownChange`] if either heads value names an
    /// unknown change.
    pub fn diff(&self, from: &Heads, to: &Heads) -> CoreResult<Vec<Patch>> {
        let before = self.materialize(from)?;
        let after = self.materialize(to)?;
        Ok(diff(&before, &after))
    }

    /// Runs `f` as one scoped mutation and commits its operations as a
    /// single change on top of the current heads.
    ///
    /// Nothing is committed if `f` fails or records no operation. With a
    /// history log attached, the change is persisted before it becomes
    /// visible.
    ///
    /// # Errors
    ///
    /// Returns the callback's error, or a persistence error.
    pub fn change<T, F>(&self, origin: Origin, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> CoreResult<T>,
    {
        self.change_with_id(origin, f).map(|(result, _)| result)
    }

    /// Like [`change`](Self::change), also returning the id of the committed
    /// change (`None` when nothing was recorded).
    ///
    /// # Errors
    ///
    /// Returns the callback's error, or a persistence error.
    pub fn change_with_id<T, F>(&self, origin: Origin, f: F) -> CoreResult<(T, Option<ChangeId>)>
    where
        F: FnOnce(&mut Transaction<'_>) -> CoreResult<T>,
    {
        let mut state = self.state.write();
        let base = Arc::clone(&state.view);
        let mut tx = Transaction::new(&base);
        let result = f(&mut tx)?;
        let finished = tx.finish();
        if finished.ops.is_empty() {
            return Ok((result, None));
        }
        let parents = state.heads.clone();
        let (id, event) = self.commit(&mut state, finished, parents, origin)?;
        self.publish(state, event);
        Ok((result, Some(id)))
    }

    /// Appends `operations` as a change whose parents are `parents`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConflictRejected`] if a parent is not in the
    /// history; the caller should resynchronize.
    pub fn append(
        &self,
        operations: Vec<Operation>,
        parents: &Heads,
        origin: Origin,
    ) -> CoreResult<Heads> {
        let operations: Vec<Operation> = operations
            .into_iter()
            .map(|mut op| {
                if let Key::File(path) = &op.key {
                    op.key = Key::File(normalize_path(path));
                }
                op
            })
            .collect();
        let mut state = self.state.write();
        let missing: Vec<ChangeId> = parents
            .iter()
            .filter(|p| !state.graph.contains(p))
            .copied()
            .collect();
        if !missing.is_empty() {
            tracing::warn!(missing = missing.len(), "append rejected: causal gap");
            return Err(CoreError::conflict_rejected(missing));
        }
        if operations.is_empty() {
            return Ok(state.heads.clone());
        }
        let finished = Finished {
            view: None,
            ops: operations,
            message: None,
            author: None,
        };
        let (_, event) = self.commit(&mut state, finished, parents.clone(), origin)?;
        let heads = state.heads.clone();
        self.publish(state, event);
        Ok(heads)
    }

    /// Applies patches on top of the current heads as one change.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn apply_patches(&self, patches: Vec<Patch>, origin: Origin) -> CoreResult<Heads> {
        let mut state = self.state.write();
        if patches.is_empty() {
            return Ok(state.heads.clone());
        }
        let parents = state.heads.clone();
        let finished = Finished {
            view: None,
            ops: patches,
            message: None,
            author: None,
        };
        let (_, event) = self.commit(&mut state, finished, parents, origin)?;
        let heads = state.heads.clone();
        self.publish(state, event);
        Ok(heads)
    }

    fn commit(
        &self,
        state: &mut DocState,
        finished: Finished,
        parents: Heads,
        origin: Origin,
    ) -> CoreResult<(ChangeId, PendingEvent)> {
        let actor = self.config.actor;
        let seq = state.graph.next_seq(&actor);
        let timestamp = state.stamper.tick(self.clock.as_ref());
        let mut change = Change::new(actor, seq, parents.iter().copied(), finished.ops)
            .with_timestamp(timestamp);
        change.message = finished.message;
        change.author = finished.author.or_else(|| self.config.author.clone());

        let encoded = change.encode()?;
        let id = Change::id_of_encoding(&encoded);
        if let Some(log) = state.log.as_mut() {
            log.append(&id, &encoded)?;
        }

        let incremental = parents == state.heads;
        let changed: BTreeSet<Key> = change.operations.iter().map(|op| op.key.clone()).collect();
        let change = Arc::new(change);
        state.graph.insert(id, Arc::clone(&change))?;

        let before = state.heads.clone();
        state.heads.advance(&change.parents, id);
        let (view, changed) = if incremental {
            let view = match finished.view {
                Some(view) => view,
                None => {
                    let mut view = state.view.as_ref().clone();
                    for op in &change.operations {
                        view.apply_operation(op);
                    }
                    view
                }
            };
            (view, changed)
        } else {
            let view = state.graph.materialize(&state.heads)?;
            let changed = touched_keys(&diff(&state.view, &view));
            (view, changed)
        };
        state.view = Arc::new(view);

        tracing::debug!(change = %id.short(), seq, ops = change.operations.len(), ?origin, "committed change");
        let event = PendingEvent {
            changes: vec![id],
            before,
            after: state.heads.clone(),
            origin,
            changed,
        };
        Ok((id, event))
    }

    /// Releases the state lock, then emits `event`.
    fn publish(&self, state: RwLockWriteGuard<'_, DocState>, event: PendingEvent) {
        let _order = self.publishing.lock();
        drop(state);
        self.feed.emit(
            event.changes,
            event.before,
            event.after,
            event.origin,
            event.changed,
        );
    }

    /// Folds in a change produced elsewhere.
    ///
    /// Merging a change that is already known has no effect.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConflictRejected`] if the change's parents are
    /// not all known.
    pub fn merge(&self, change: Change) -> CoreResult<Heads> {
        let report = self.merge_all(vec![change])?;
        if report.has_gap() {
            return Err(CoreError::conflict_rejected(report.missing));
        }
        Ok(report.heads)
    }

    /// Folds in a batch of changes in causal order.
    ///
    /// Changes whose ancestry cannot be completed are left out and their
    /// missing parents reported; everything else is applied.
    ///
    /// # Errors
    ///
    /// Returns an encoding or persistence error.
    pub fn merge_all(&self, changes: Vec<Change>) -> CoreResult<MergeReport> {
        let mut state = self.state.write();
        let mut report = MergeReport::default();

        let mut pending: Vec<(ChangeId, Vec<u8>, Change)> = Vec::new();
        let mut batch_ids = HashSet::new();
        for change in changes {
            let encoded = change.encode()?;
            let id = Change::id_of_encoding(&encoded);
            if state.graph.contains(&id) || !batch_ids.insert(id) {
                report.duplicates += 1;
                continue;
            }
            pending.push((id, encoded, change));
        }

        let before = state.heads.clone();
        loop {
            let (ready, blocked): (Vec<_>, Vec<_>) = pending
                .into_iter()
                .partition(|(_, _, c)| state.graph.missing_parents(c).is_empty());
            pending = blocked;
            if ready.is_empty() {
                break;
            }
            for (id, encoded, change) in ready {
                if let Some(log) = state.log.as_mut() {
                    log.append(&id, &encoded)?;
                }
                state.stamper.receive(change.timestamp_ms);
                let change = Arc::new(change);
                state.graph.insert(id, Arc::clone(&change))?;
                state.heads.advance(&change.parents, id);
                report.applied.push(id);
            }
        }

        if !pending.is_empty() {
            let missing: BTreeSet<ChangeId> = pending
                .iter()
                .flat_map(|(_, _, c)| c.parents.iter())
                .filter(|p| !state.graph.contains(p) && !batch_ids.contains(p))
                .copied()
                .collect();
            report.missing = missing.into_iter().collect();
            tracing::warn!(
                blocked = pending.len(),
                missing = report.missing.len(),
                "merge left a causal gap"
            );
        }

        report.heads = state.heads.clone();
        if !report.applied.is_empty() {
            let view = state.graph.materialize(&state.heads)?;
            let changed = touched_keys(&diff(&state.view, &view));
            state.view = Arc::new(view);
            tracing::debug!(applied = report.applied.len(), "merged remote changes");
            let event = PendingEvent {
                changes: report.applied.clone(),
                before,
                after: state.heads.clone(),
                origin: Origin::Remote,
                changed,
            };
            self.publish(state, event);
        }
        Ok(report)
    }

    /// Subscribes to committed changes.
    pub fn subscribe(&self) -> Receiver<DocumentEvent> {
        self.feed.subscribe()
    }

    /// The change feed.
    #[must_use]
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Current time from the store's clock.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Forces the attached history log to stable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&self) -> CoreResult<()> {
        if let Some(log) = self.state.write().log.as_mut() {
            log.sync()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for VersionedDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("VersionedDocumentStore")
            .field("actor", &self.config.actor)
            .field("heads", &state.heads)
            .field("changes", &state.graph.len())
            .field("files", &state.view.len())
            .finish()
    }
}
