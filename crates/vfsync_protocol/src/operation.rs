//! Edit operations.

use crate::value::{Key, Value};
use serde::{Deserialize, Serialize};

/// What an operation does to its key.
///
/// Text positions are counted in Unicode scalar values and clamped to the
/// current length, so replay never fails on an out-of-range index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Sets the leaf, replacing any previous value and kind.
    Put {
        /// New value.
        value: Value,
    },
    /// Removes the leaf.
    Delete,
    /// Inserts text at a character index of a text leaf.
    Insert {
        /// Character index.
        index: usize,
        /// Inserted text.
        text: String,
    },
    /// Replaces `delete` characters at `index` of a text leaf with `text`.
    Splice {
        /// Character index.
        index: usize,
        /// Number of characters removed.
        delete: usize,
        /// Inserted text.
        text: String,
    },
    /// Adds `delta` to a counter leaf, creating it when absent.
    Increment {
        /// Signed delta.
        delta: i64,
    },
}

/// A single addressed edit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    /// Target leaf.
    pub key: Key,
    /// Edit applied to it.
    pub action: Action,
}

/// A patch is an operation produced by `diff` rather than by a writer.
pub type Patch = Operation;

impl Operation {
    /// Sets `key` to `value`.
    pub fn put(key: Key, value: impl Into<Value>) -> Self {
        Self {
            key,
            action: Action::Put {
                value: value.into(),
            },
        }
    }

    /// Removes `key`.
    #[must_use]
    pub fn delete(key: Key) -> Self {
        Self {
            key,
            action: Action::Delete,
        }
    }

    /// Inserts `text` at `index`.
    pub fn insert(key: Key, index: usize, text: impl Into<String>) -> Self {
        Self {
            key,
            action: Action::Insert {
                index,
                text: text.into(),
            },
        }
    }

    /// Replaces a character range.
    pub fn splice(key: Key, index: usize, delete: usize, text: impl Into<String>) -> Self {
        Self {
            key,
            action: Action::Splice {
                index,
                delete,
                text: text.into(),
            },
        }
    }

    /// Adds `delta` to a counter.
    #[must_use]
    pub fn increment(key: Key, delta: i64) -> Self {
        Self {
            key,
            action: Action::Increment { delta },
        }
    }
}
