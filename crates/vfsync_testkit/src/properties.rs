//! Property suites for the document core.

use crate::fixtures::{empty_store, TestRepository};
use crate::generators::{edit_sequence_strategy, Edit, PropTestConfig};
use proptest::prelude::*;
use vfsync_core::{apply, diff, DocumentView, Origin, UndoRedoManager, VersionedDocumentStore};

/// Commits each transaction; returns the projection after every commit
/// that produced a change, starting with the initial one.
fn run(store: &VersionedDocumentStore, txs: &[Vec<Edit>]) -> Vec<DocumentView> {
    let mut views = vec![(*store.view()).clone()];
    for edits in txs {
        let (_, id) = store
            .change_with_id(Origin::Local, |tx| {
                for edit in edits {
                    edit.apply(tx)?;
                }
                Ok(())
            })
            .unwrap();
        if id.is_some() {
            views.push((*store.view()).clone());
        }
    }
    views
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn undo_walks_back_through_every_state(txs in edit_sequence_strategy(1, 8)) {
        let store = empty_store(1);
        let mut undo = UndoRedoManager::new(store.clone());
        let views = run(&store, &txs);

        prop_assert_eq!(undo.undo_depth(), views.len() - 1);
        for expected in views.iter().rev().skip(1) {
            prop_assert!(undo.undo().unwrap().is_applied());
            prop_assert_eq!(&*store.view(), expected);
        }
        prop_assert!(!undo.undo().unwrap().is_applied());
    }

    #[test]
    fn redo_after_undo_restores_the_undone_state(
        txs in edit_sequence_strategy(1, 6),
        steps in 1usize..6,
    ) {
        let store = empty_store(1);
        let mut undo = UndoRedoManager::new(store.clone());
        let views = run(&store, &txs);
        let steps = steps.min(views.len() - 1);

        for _ in 0..steps {
            undo.undo().unwrap();
        }
        for _ in 0..steps {
            prop_assert!(undo.redo().unwrap().is_applied());
        }
        prop_assert_eq!(&*store.view(), views.last().unwrap());
        prop_assert!(!undo.can_redo());
    }

    #[test]
    fn diff_then_apply_reaches_target(
        a in edit_sequence_strategy(0, 5),
        b in edit_sequence_strategy(0, 5),
    ) {
        let left = empty_store(1);
        let right = empty_store(2);
        run(&left, &a);
        run(&right, &b);

        let mut view = (*left.view()).clone();
        let patches = diff(&view, &right.view());
        apply(&mut view, &patches);
        prop_assert_eq!(&view, &*right.view());
        prop_assert!(diff(&view, &right.view()).is_empty());
    }

    #[test]
    fn concurrent_histories_converge(
        base in edit_sequence_strategy(0, 3),
        a in edit_sequence_strategy(0, 5),
        b in edit_sequence_strategy(0, 5),
    ) {
        let left = empty_store(1);
        let right = empty_store(2);
        run(&left, &base);
        let shared = left.heads();
        right.merge_all(left.changes_since(&vfsync_protocol::Heads::new()).unwrap()).unwrap();

        run(&left, &a);
        run(&right, &b);
        let from_left = left.changes_since(&shared).unwrap();
        let mut from_right = right.changes_since(&shared).unwrap();
        from_right.reverse();

        let report = left.merge_all(from_right).unwrap();
        prop_assert!(!report.has_gap());
        let report = right.merge_all(from_left).unwrap();
        prop_assert!(!report.has_gap());

        prop_assert_eq!(left.heads(), right.heads());
        prop_assert_eq!(&*left.view(), &*right.view());
        prop_assert_eq!(left.change_count(), right.change_count());
    }
}

proptest! {
    #![proptest_config(PropTestConfig { cases: 8, max_shrink_iters: 20 }.to_proptest_config())]

    #[test]
    fn reopened_history_replays_to_same_view(txs in edit_sequence_strategy(1, 6)) {
        let mut fixture = TestRepository::new();
        let (heads, view) = {
            let store = fixture.open_project("prop").unwrap();
            run(&store, &txs);
            fixture.close(&store).unwrap();
            let (heads, view) = store.current();
            (heads, (*view).clone())
        };
        fixture.reopen();
        let store = fixture.open_project("prop").unwrap();
        prop_assert_eq!(store.heads(), heads);
        prop_assert_eq!(&*store.view(), &view);
    }
}
