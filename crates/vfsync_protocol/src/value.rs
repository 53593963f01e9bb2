//! Document keys and leaf values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of a leaf in a document.
///
/// Files live in the file map keyed by canonical path. Metadata entries
/// (snapshot stamps, counters) live in a separate map so they never show up
/// as files.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    /// A file, by canonical path.
    File(String),
    /// A document metadata entry, by name.
    Meta(String),
}

impl Key {
    /// Shorthand for [`Key::File`].
    pub fn file(path: impl Into<String>) -> Self {
        Self::File(path.into())
    }

    /// Shorthand for [`Key::Meta`].
    pub fn meta(name: impl Into<String>) -> Self {
        Self::Meta(name.into())
    }

    /// The file path, if this is a file key.
    #[must_use]
    pub fn as_file(&self) -> Option<&str> {
        match self {
            Self::File(path) => Some(path),
            Self::Meta(_) => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.write_str(path),
            Self::Meta(name) => write!(f, "@{name}"),
        }
    }
}

/// Explicit type of a leaf, checked before any positional or numeric edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// UTF-8 text; supports insert and splice by character index.
    Text,
    /// Opaque bytes; only replaced wholesale.
    Binary,
    /// A 64-bit counter; supports increment.
    Counter,
}

/// A leaf value.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// Text content.
    Text(String),
    /// Binary content.
    Binary(Vec<u8>),
    /// Counter.
    Counter(i64),
}

impl Value {
    /// The leaf's type discriminant.
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Text(_) => ValueKind::Text,
            Self::Binary(_) => ValueKind::Binary,
            Self::Counter(_) => ValueKind::Counter,
        }
    }

    /// Text content, if this is a text leaf.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Counter value, if this is a counter leaf.
    #[must_use]
    pub const fn as_counter(&self) -> Option<i64> {
        match self {
            Self::Counter(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "Text({text:?})"),
            Self::Binary(bytes) => write!(f, "Binary({} bytes)", bytes.len()),
            Self::Counter(n) => write!(f, "Counter({n})"),
        }
    }
}
