//! Undo/redo over document heads.
//!
//! The manager never rewinds the store. An undo computes the patches from
//! the current projection to the projection at an earlier heads value and
//! commits them as a new change, tagged with the manager's [`GuardToken`] so
//! the manager does not record its own edit as a fresh user action.

use crate::change_feed::{DocumentEvent, GuardToken, Origin};
use crate::error::CoreResult;
use crate::store::VersionedDocumentStore;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use vfsync_protocol::Heads;

/// What the manager is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoState {
    /// Observing edits.
    Idle,
    /// Replaying an undo.
    ApplyingUndo,
    /// Replaying a redo.
    ApplyingRedo,
}

/// Result of [`UndoRedoManager::undo`] / [`UndoRedoManager::redo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoOutcome {
    /// The stack was empty; nothing happened.
    Empty,
    /// The document now shows the state recorded at `restored`.
    Applied {
        /// Heads whose projection was restored.
        restored: Heads,
        /// Heads of the document after the forward edit.
        heads: Heads,
    },
}

impl UndoOutcome {
    /// Whether anything happened.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Heads-stack undo/redo for one document.
///
/// Every observed head transition not caused by this manager pushes the
/// previous heads onto the undo stack and clears the redo stack. Events are
/// drained at the start of each call, so edits made since the last call are
/// accounted for before undoing.
pub struct UndoRedoManager {
    store: Arc<VersionedDocumentStore>,
    events: Receiver<DocumentEvent>,
    token: GuardToken,
    state: UndoState,
    last_known: Heads,
    undo_stack: Vec<Heads>,
    redo_stack: Vec<Heads>,
    limit: usize,
}

impl UndoRedoManager {
    /// Starts tracking `store` from its current heads.
    #[must_use]
    pub fn new(store: Arc<VersionedDocumentStore>) -> Self {
        let events = store.subscribe();
        let last_known = store.heads();
        Self {
            store,
            events,
            token: GuardToken::new(),
            state: UndoState::Idle,
            last_known,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            limit: usize::MAX,
        }
    }

    /// Caps the undo depth; the oldest entries are dropped first.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// This manager's guard token.
    #[must_use]
    pub fn token(&self) -> GuardToken {
        self.token
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> UndoState {
        self.state
    }

    /// Heads recorded after the last observed transition.
    #[must_use]
    pub fn last_known(&self) -> &Heads {
        &self.last_known
    }

    /// Records any edits committed since the last call.
    pub fn observe(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.record(&event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::warn!("undo manager lost its change feed");
                    break;
                }
            }
        }
    }

    /// Edits tagged with this manager's token are its own replays.
    fn record(&mut self, event: &DocumentEvent) {
        if event.origin == Origin::UndoRedo(self.token) {
            return;
        }
        if event.after == self.last_known {
            return;
        }
        let previous = std::mem::replace(&mut self.last_known, event.after.clone());
        self.undo_stack.push(previous);
        if self.undo_stack.len() > self.limit {
            self.undo_stack.remove(0);
        }
        self.redo_stack.clear();
    }

    /// Number of undoable steps.
    pub fn undo_depth(&mut self) -> usize {
        self.observe();
        self.undo_stack.len()
    }

    /// Number of redoable steps.
    pub fn redo_depth(&mut self) -> usize {
        self.observe();
        self.redo_stack.len()
    }

    /// Whether [`undo`](Self::undo) would do anything.
    pub fn can_undo(&mut self) -> bool {
        self.undo_depth() > 0
    }

    /// Whether [`redo`](Self::redo) would do anything.
    pub fn can_redo(&mut self) -> bool {
        self.redo_depth() > 0
    }

    /// Forgets all history.
    pub fn clear(&mut self) {
        self.observe();
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    /// Reverts the most recent edit.
    ///
    /// # Errors
    ///
    /// Returns an error if the patches cannot be committed. The stacks are
    /// left as they were.
    pub fn undo(&mut self) -> CoreResult<UndoOutcome> {
        self.observe();
        let Some(target) = self.undo_stack.pop() else {
            return Ok(UndoOutcome::Empty);
        };
        match self.travel(UndoState::ApplyingUndo, &target) {
            Ok((current, heads)) => {
                self.redo_stack.push(current);
                Ok(UndoOutcome::Applied {
                    restored: target,
                    heads,
                })
            }
            Err(err) => {
                self.undo_stack.push(target);
                Err(err)
            }
        }
    }

    /// Re-applies the most recently undone edit.
    ///
    /// # Errors
    ///
    /// Returns an error if the patches cannot be committed. The stacks are
    /// left as they were.
    pub fn redo(&mut self) -> CoreResult<UndoOutcome> {
        self.observe();
        let Some(target) = self.redo_stack.pop() else {
            return Ok(UndoOutcome::Empty);
        };
        match self.travel(UndoState::ApplyingRedo, &target) {
            Ok((current, heads)) => {
                self.undo_stack.push(current);
                Ok(UndoOutcome::Applied {
                    restored: target,
                    heads,
                })
            }
            Err(err) => {
                self.redo_stack.push(target);
                Err(err)
            }
        }
    }

    /// Moves the projection to `target` with a forward edit. Returns the
    /// heads before and after.
    fn travel(&mut self, mode: UndoState, target: &Heads) -> CoreResult<(Heads, Heads)> {
        self.state = mode;
        let result = self.step(mode, target);
        self.state = UndoState::Idle;
        if let Ok((_, heads)) = &result {
            self.last_known = heads.clone();
        }
        result
    }

    fn step(&self, mode: UndoState, target: &Heads) -> CoreResult<(Heads, Heads)> {
        let current = self.store.heads();
        let patches = self.store.diff(&current, target)?;
        tracing::debug!(?mode, patches = patches.len(), "replaying history step");
        let heads = self
            .store
            .apply_patches(patches, Origin::UndoRedo(self.token))?;
        Ok((current, heads))
    }
}

impl std::fmt::Debug for UndoRedoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoRedoManager")
            .field("state", &self.state)
            .field("undo", &self.undo_stack.len())
            .field("redo", &self.redo_stack.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DocumentConfig;

    fn setup() -> (Arc<VersionedDocumentStore>, UndoRedoManager) {
        let store = Arc::new(VersionedDocumentStore::new(DocumentConfig::default()));
        let manager = UndoRedoManager::new(Arc::clone(&store));
        (store, manager)
    }

    fn write(store: &VersionedDocumentStore, path: &str, text: &str) {
        store.change(Origin::Local, |tx| tx.put_text(path, text)).unwrap();
    }

    #[test]
    fn empty_stacks_are_noops() {
        let (store, mut manager) = setup();
        assert_eq!(manager.undo().unwrap(), UndoOutcome::Empty);
        assert_eq!(manager.redo().unwrap(), UndoOutcome::Empty);
        assert_eq!(store.change_count(), 0);
        assert_eq!(manager.state(), UndoState::Idle);
    }

    #[test]
    fn undo_all_then_redo_all() {
        let (store, mut manager) = setup();
        write(&store, "/a", "1");
        write(&store, "/a", "12");
        write(&store, "/b", "x");
        assert_eq!(manager.undo_depth(), 3);

        for _ in 0..3 {
            assert!(manager.undo().unwrap().is_applied());
        }
        assert!(store.view().is_empty());
        assert!(!manager.can_undo());

        manager.redo().unwrap();
        assert_eq!(store.get_text("/a").as_deref(), Some("1"));
        manager.redo().unwrap();
        manager.redo().unwrap();
        assert_eq!(store.get_text("/a").as_deref(), Some("12"));
        assert_eq!(store.get_text("/b").as_deref(), Some("x"));
        assert_eq!(manager.undo_depth(), 3);
    }

    #[test]
    fn own_edits_are_not_recorded() {
        let (store, mut manager) = setup();
        write(&store, "/a", "1");
        manager.undo().unwrap();
        assert_eq!(manager.undo_depth(), 0);
        assert_eq!(manager.redo_depth(), 1);
    }

    #[test]
    fn replays_are_skipped_by_token_alone() {
        let (store, mut manager) = setup();
        write(&store, "/a", "1");
        write(&store, "/a", "2");
        manager.undo().unwrap();
        write(&store, "/b", "x");
        assert_eq!(manager.state(), UndoState::Idle);
        assert_eq!(manager.undo_depth(), 2);
        assert_eq!(manager.redo_depth(), 0);
    }

    #[test]
    fn new_edit_clears_redo() {
        let (store, mut manager) = setup();
        write(&store, "/a", "1");
        write(&store, "/a", "2");
        manager.undo().unwrap();
        assert!(manager.can_redo());
        write(&store, "/a", "3");
        assert!(!manager.can_redo());
        manager.undo().unwrap();
        assert_eq!(store.get_text("/a").as_deref(), Some("1"));
    }

    #[test]
    fn another_managers_edits_count_as_external() {
        let (store, mut first) = setup();
        let mut second = UndoRedoManager::new(Arc::clone(&store));
        write(&store, "/a", "1");
        second.undo().unwrap();
        assert_eq!(first.undo_depth(), 2);
    }

    #[test]
    fn limit_drops_oldest() {
        let (store, manager) = setup();
        let mut manager = manager.with_limit(2);
        for i in 0..5 {
            write(&store, "/a", &i.to_string());
        }
        assert_eq!(manager.undo_depth(), 2);
        manager.undo().unwrap();
        manager.undo().unwrap();
        assert_eq!(store.get_text("/a").as_deref(), Some("2"));
    }
}
