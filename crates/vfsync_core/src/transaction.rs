//! Scoped mutation of a document.

use crate::error::{CoreError, CoreResult};
use crate::view::DocumentView;
use vfsync_protocol::{is_under, normalize_path, rebase, FileContent, Key, Operation, Value};

/// Collects the operations of one scoped mutation.
///
/// Created by [`VersionedDocumentStore::change`](crate::VersionedDocumentStore::change).
/// Reads see the document as of the start of the transaction plus the
/// transaction's own writes. All recorded operations become a single
/// change when the callback returns `Ok`.
#[derive(Debug)]
pub struct Transaction<'a> {
    base: &'a DocumentView,
    working: Option<DocumentView>,
    ops: Vec<Operation>,
    message: Option<String>,
    author: Option<String>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(base: &'a DocumentView) -> Self {
        Self {
            base,
            working: None,
            ops: Vec::new(),
            message: None,
            author: None,
        }
    }

    /// The document as seen by this transaction.
    #[must_use]
    pub fn view(&self) -> &DocumentView {
        self.working.as_ref().unwrap_or(self.base)
    }

    /// Reads a file.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.view().file(&normalize_path(path))
    }

    /// Whether a file exists at `path`.
    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Paths of every file at or below `prefix`.
    #[must_use]
    pub fn paths_under(&self, prefix: &str) -> Vec<String> {
        let prefix = normalize_path(prefix);
        self.view()
            .files()
            .keys()
            .filter(|p| is_under(p, &prefix))
            .cloned()
            .collect()
    }

    /// Records and applies a raw operation.
    pub fn push(&mut self, op: Operation) {
        let working = self.working.get_or_insert_with(|| self.base.clone());
        working.apply_operation(&op);
        self.ops.push(op);
    }

    fn file_key(path: &str) -> CoreResult<Key> {
        let canonical = normalize_path(path);
        if canonical == "/" {
            return Err(CoreError::invalid_path(path, "root is a directory"));
        }
        Ok(Key::File(canonical))
    }

    /// Writes a file.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPath`] for the root path.
    pub fn put_file(&mut self, path: &str, content: FileContent) -> CoreResult<()> {
        let value = match content {
            FileContent::Text(text) => Value::Text(text),
            FileContent::Binary(bytes) => Value::Binary(bytes),
        };
        let key = Self::file_key(path)?;
        self.push(Operation::put(key, value));
        Ok(())
    }

    /// Writes a text file.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPath`] for the root path.
    pub fn put_text(&mut self, path: &str, text: impl Into<String>) -> CoreResult<()> {
        self.put_file(path, FileContent::Text(text.into()))
    }

    /// Writes a binary file.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPath`] for the root path.
    pub fn put_binary(&mut self, path: &str, bytes: Vec<u8>) -> CoreResult<()> {
        self.put_file(path, FileContent::Binary(bytes))
    }

    /// Sets a metadata entry.
    pub fn put_meta(&mut self, name: &str, value: Value) {
        self.push(Operation::put(Key::meta(name), value));
    }

    /// Deletes one file. Returns whether it existed.
    pub fn delete(&mut self, path: &str) -> bool {
        let canonical = normalize_path(path);
        if self.view().file(&canonical).is_none() {
            return false;
        }
        self.push(Operation::delete(Key::File(canonical)));
        true
    }

    /// Deletes `path` if it is a file, otherwise every file below it.
    /// Returns the number of files removed.
    pub fn delete_prefix(&mut self, path: &str) -> usize {
        if self.delete(path) {
            return 1;
        }
        let doomed = self.paths_under(path);
        for p in &doomed {
            self.push(Operation::delete(Key::File(p.clone())));
        }
        doomed.len()
    }

    /// Inserts text at a character index of a text file.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPath`] for the root path.
    pub fn insert_text(&mut self, path: &str, index: usize, text: &str) -> CoreResult<()> {
        let key = Self::file_key(path)?;
        self.push(Operation::insert(key, index, text));
        Ok(())
    }

    /// Replaces a character range of a text file.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPath`] for the root path.
    pub fn splice_text(
        &mut self,
        path: &str,
        index: usize,
        delete: usize,
        text: &str,
    ) -> CoreResult<()> {
        let key = Self::file_key(path)?;
        self.push(Operation::splice(key, index, delete, text));
        Ok(())
    }

    /// Adds `delta` to a counter.
    pub fn increment(&mut self, key: Key, delta: i64) {
        self.push(Operation::increment(key, delta));
    }

    /// Moves a file, or every file below a directory prefix.
    /// Returns the number of files moved.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPath`] if the destination is the root
    /// or lies inside the source.
    pub fn rename(&mut self, from: &str, to: &str) -> CoreResult<usize> {
        let from = normalize_path(from);
        let to = normalize_path(to);
        if from == to {
            return Ok(0);
        }
        if to == "/" || is_under(&to, &from) {
            return Err(CoreError::invalid_path(to, "cannot move a path into itself"));
        }
        let moves: Vec<(String, String, Value)> = self
            .paths_under(&from)
            .into_iter()
            .filter_map(|old| {
                let new = rebase(&old, &from, &to)?;
                let value = self.view().file(&old)?.clone();
                Some((old, new, value))
            })
            .collect();
        for (old, new, value) in &moves {
            self.push(Operation::delete(Key::File(old.clone())));
            self.push(Operation::put(Key::File(new.clone()), value.clone()));
        }
        Ok(moves.len())
    }

    /// Attaches a human-readable message to the resulting change.
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    /// Overrides the author of the resulting change.
    pub fn set_author(&mut self, author: impl Into<String>) {
        self.author = Some(author.into());
    }

    /// Number of recorded operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn finish(self) -> Finished {
        Finished {
            view: self.working,
            ops: self.ops,
            message: self.message,
            author: self.author,
        }
    }
}

pub(crate) struct Finished {
    pub(crate) view: Option<DocumentView>,
    pub(crate) ops: Vec<Operation>,
    pub(crate) message: Option<String>,
    pub(crate) author: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> DocumentView {
        let mut v = DocumentView::new();
        for (p, t) in [("/src/a.js", "a"), ("/src/b.js", "b"), ("/readme", "r")] {
            v.apply_operation(&Operation::put(Key::file(p), t));
        }
        v
    }

    #[test]
    fn reads_see_own_writes() {
        let base = base();
        let mut tx = Transaction::new(&base);
        tx.put_text("new.txt", "n").unwrap();
        assert!(tx.exists("/new.txt"));
        assert!(base.file("/new.txt").is_none());
    }

    #[test]
    fn rename_moves_subtree() {
        let base = base();
        let mut tx = Transaction::new(&base);
        assert_eq!(tx.rename("/src", "/lib").unwrap(), 2);
        assert!(tx.paths_under("/src").is_empty());
        assert_eq!(tx.paths_under("/lib"), vec!["/lib/a.js", "/lib/b.js"]);
        assert!(tx.rename("/lib", "/lib/inner").is_err());
    }

    #[test]
    fn delete_prefix_counts() {
        let base = base();
        let mut tx = Transaction::new(&base);
        assert_eq!(tx.delete_prefix("/readme"), 1);
        assert_eq!(tx.delete_prefix("/src"), 2);
        assert_eq!(tx.delete_prefix("/nothing"), 0);
        assert!(tx.view().is_empty());
    }

    #[test]
    fn root_is_not_a_file() {
        let base = DocumentView::new();
        let mut tx = Transaction::new(&base);
        assert!(matches!(tx.put_text("/", "x"), Err(CoreError::InvalidPath { .. })));
        assert!(tx.is_empty());
    }
}
