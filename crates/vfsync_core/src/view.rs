//! The materialized projection of a document and patch application.

use std::collections::BTreeMap;
use vfsync_protocol::{Action, Key, Operation, Value, ValueKind};

/// The `path -> content` projection reachable from some heads, plus
/// document metadata.
///
/// Views are immutable once published by the store; readers always see a
/// complete projection for a single heads value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentView {
    files: BTreeMap<String, Value>,
    meta: BTreeMap<String, Value>,
}

impl DocumentView {
    /// An empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a view holding only `files`.
    #[must_use]
    pub fn from_files(files: BTreeMap<String, Value>) -> Self {
        Self {
            files,
            meta: BTreeMap::new(),
        }
    }

    /// Looks up a leaf.
    #[must_use]
    pub fn get(&self, key: &Key) -> Option<&Value> {
        match key {
            Key::File(path) => self.files.get(path),
            Key::Meta(name) => self.meta.get(name),
        }
    }

    /// Looks up a file by canonical path.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<&Value> {
        self.files.get(path)
    }

    /// The file map.
    #[must_use]
    pub fn files(&self) -> &BTreeMap<String, Value> {
        &self.files
    }

    /// The metadata map.
    #[must_use]
    pub fn meta(&self) -> &BTreeMap<String, Value> {
        &self.meta
    }

    /// Number of files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the document holds no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Replaces the metadata map, keeping files.
    #[must_use]
    pub fn with_meta(mut self, meta: BTreeMap<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    /// Iterates every leaf as `(key, value)` in key order.
    pub fn entries(&self) -> impl Iterator<Item = (Key, &Value)> + '_ {
        self.files
            .iter()
            .map(|(path, value)| (Key::File(path.clone()), value))
            .chain(
                self.meta
                    .iter()
                    .map(|(name, value)| (Key::Meta(name.clone()), value)),
            )
    }

    fn container_mut<'a, 'k>(
        &'a mut self,
        key: &'k Key,
    ) -> (&'a mut BTreeMap<String, Value>, &'k str) {
        match key {
            Key::File(path) => (&mut self.files, path.as_str()),
            Key::Meta(name) => (&mut self.meta, name.as_str()),
        }
    }

    /// Applies one operation in place.
    ///
    /// Returns `false` when the operation was skipped because the leaf's
    /// kind does not support it (text edits on a missing or non-text leaf,
    /// increments on a non-counter). Skipping is part of the replay rules,
    /// so every replica skips the same operations.
    pub fn apply_operation(&mut self, op: &Operation) -> bool {
        let (container, name) = self.container_mut(&op.key);
        match &op.action {
            Action::Put { value } => {
                container.insert(name.to_string(), value.clone());
                true
            }
            Action::Delete => container.remove(name).is_some(),
            Action::Insert { index, text } => match container.get_mut(name) {
                Some(Value::Text(leaf)) => {
                    splice_chars(leaf, *index, 0, text);
                    true
                }
                _ => skipped(&op.key, ValueKind::Text),
            },
            Action::Splice {
                index,
                delete,
                text,
            } => match container.get_mut(name) {
                Some(Value::Text(leaf)) => {
                    splice_chars(leaf, *index, *delete, text);
                    true
                }
                _ => skipped(&op.key, ValueKind::Text),
            },
            Action::Increment { delta } => match container.get_mut(name) {
                Some(Value::Counter(n)) => {
                    *n = n.wrapping_add(*delta);
                    true
                }
                None => {
                    container.insert(name.to_string(), Value::Counter(*delta));
                    true
                }
                Some(_) => skipped(&op.key, ValueKind::Counter),
            },
        }
    }
}

fn skipped(key: &Key, expected: ValueKind) -> bool {
    tracing::debug!(%key, ?expected, "operation skipped: leaf kind mismatch");
    false
}

/// Applies `patches` to `view` in order.
///
/// Text patches are positional splices on the text leaf itself; puts and
/// deletes mutate the owning map; increments touch counters only.
pub fn apply(view: &mut DocumentView, patches: &[Operation]) {
    for patch in patches {
        view.apply_operation(patch);
    }
}

/// Replaces `delete` characters at character `index` with `text`, clamping
/// both to the current length.
pub(crate) fn splice_chars(leaf: &mut String, index: usize, delete: usize, text: &str) {
    let char_len = leaf.chars().count();
    let start = index.min(char_len);
    let end = start + delete.min(char_len - start);
    let byte_start = byte_offset(leaf, start);
    let byte_end = byte_offset(leaf, end);
    leaf.replace_range(byte_start..byte_end, text);
}

fn byte_offset(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map_or(text.len(), |(offset, _)| offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_view(path: &str, text: &str) -> DocumentView {
        let mut view = DocumentView::new();
        view.apply_operation(&Operation::put(Key::file(path), text));
        view
    }

    #[test]
    fn splice_counts_characters() {
        let mut s = "héllo wörld".to_string();
        splice_chars(&mut s, 6, 5, "there");
        assert_eq!(s, "héllo there");
        splice_chars(&mut s, 100, 3, "!");
        assert_eq!(s, "héllo there!");
        splice_chars(&mut s, 1, 100, "");
        assert_eq!(s, "h");
    }

    #[test]
    fn text_edits_need_text_leaf() {
        let mut view = text_view("/a.txt", "abc");
        assert!(view.apply_operation(&Operation::insert(Key::file("/a.txt"), 1, "X")));
        assert_eq!(view.file("/a.txt"), Some(&Value::from("aXbc")));

        assert!(!view.apply_operation(&Operation::insert(Key::file("/missing"), 0, "X")));
        assert!(view.file("/missing").is_none());

        view.apply_operation(&Operation::put(Key::file("/bin"), vec![1u8, 2]));
        assert!(!view.apply_operation(&Operation::splice(Key::file("/bin"), 0, 1, "t")));
        assert_eq!(view.file("/bin"), Some(&Value::Binary(vec![1, 2])));
    }

    #[test]
    fn increments_create_and_accumulate() {
        let mut view = DocumentView::new();
        let key = Key::meta("edits");
        view.apply_operation(&Operation::increment(key.clone(), 2));
        view.apply_operation(&Operation::increment(key.clone(), -5));
        assert_eq!(view.get(&key).and_then(Value::as_counter), Some(-3));

        let mut view = text_view("/n", "7");
        assert!(!view.apply_operation(&Operation::increment(Key::file("/n"), 1)));
    }

    #[test]
    fn meta_is_not_a_file() {
        let mut view = DocumentView::new();
        view.apply_operation(&Operation::put(Key::meta("lastSnapshotAt"), Value::Counter(1)));
        assert!(view.is_empty());
        assert_eq!(view.meta().len(), 1);
        assert_eq!(view.entries().count(), 1);
    }

    #[test]
    fn delete_reports_presence() {
        let mut view = text_view("/a", "x");
        assert!(view.apply_operation(&Operation::delete(Key::file("/a"))));
        assert!(!view.apply_operation(&Operation::delete(Key::file("/a"))));
    }
}
