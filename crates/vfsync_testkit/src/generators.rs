//! Property-based test generators using proptest.
//!
//! Edits are drawn from a small path alphabet so that sequences collide on
//! the same files often enough to exercise splices, deletes and renames.

use proptest::prelude::*;
use vfsync_core::{CoreResult, Transaction};
use vfsync_protocol::Key;

/// A user-level edit to a document.
#[derive(Debug, Clone)]
pub enum Edit {
    /// Write a whole text file.
    Put {
        /// Path.
        path: String,
        /// Content.
        text: String,
    },
    /// Delete a file or subtree.
    Delete {
        /// Path or prefix.
        path: String,
    },
    /// Insert into a text file.
    Insert {
        /// Path.
        path: String,
        /// Character index.
        index: usize,
        /// Text.
        text: String,
    },
    /// Replace a character range.
    Splice {
        /// Path.
        path: String,
        /// Character index.
        index: usize,
        /// Characters removed.
        delete: usize,
        /// Text.
        text: String,
    },
    /// Move a file or subtree.
    Rename {
        /// Source.
        from: String,
        /// Destination.
        to: String,
    },
    /// Bump a metadata counter.
    Count {
        /// Counter name.
        name: String,
        /// Delta.
        delta: i64,
    },
}

impl Edit {
    /// Records this edit in a transaction. Invalid renames are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if a path is rejected.
    pub fn apply(&self, tx: &mut Transaction<'_>) -> CoreResult<()> {
        match self {
            Self::Put { path, text } => tx.put_text(path, text.clone())?,
            Self::Delete { path } => {
                tx.delete_prefix(path);
            }
            Self::Insert { path, index, text } => tx.insert_text(path, *index, text)?,
            Self::Splice {
                path,
                index,
                delete,
                text,
            } => tx.splice_text(path, *index, *delete, text)?,
            Self::Rename { from, to } => {
                let _ = tx.rename(from, to);
            }
            Self::Count { name, delta } => tx.increment(Key::meta(name.clone()), *delta),
        }
        Ok(())
    }
}

/// Strategy for canonical file paths over a small alphabet.
pub fn path_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("/index.js".to_string()),
        Just("/package.json".to_string()),
        "/src/[a-c]\\.ts",
        "/lib/[a-b]/[x-y]\\.md",
    ]
}

/// Strategy for directory prefixes.
pub fn dir_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("/src".to_string()),
        Just("/lib".to_string()),
        Just("/lib/a".to_string()),
        Just("/out".to_string()),
    ]
}

/// Strategy for short text with some multi-byte characters.
pub fn text_strategy() -> impl Strategy<Value = String> {
    "[a-z é✓\n]{0,12}"
}

/// Strategy for a single edit.
pub fn edit_strategy() -> impl Strategy<Value = Edit> {
    prop_oneof![
        4 => (path_strategy(), text_strategy()).prop_map(|(path, text)| Edit::Put { path, text }),
        1 => prop_oneof![path_strategy(), dir_strategy()].prop_map(|path| Edit::Delete { path }),
        3 => (path_strategy(), 0usize..16, text_strategy())
            .prop_map(|(path, index, text)| Edit::Insert { path, index, text }),
        2 => (path_strategy(), 0usize..16, 0usize..8, text_strategy()).prop_map(
            |(path, index, delete, text)| Edit::Splice { path, index, delete, text }
        ),
        1 => (dir_strategy(), dir_strategy()).prop_map(|(from, to)| Edit::Rename { from, to }),
        1 => ("[a-b]", -5i64..5).prop_map(|(name, delta)| Edit::Count { name, delta }),
    ]
}

/// Strategy for a sequence of transactions, each holding one to three edits.
pub fn edit_sequence_strategy(
    min: usize,
    max: usize,
) -> impl Strategy<Value = Vec<Vec<Edit>>> {
    prop::collection::vec(prop::collection::vec(edit_strategy(), 1..4), min..max)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 128,
            max_shrink_iters: 500,
        }
    }
}

impl PropTestConfig {
    /// A fast configuration for the default test run.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
