//! Computing the patch sequence between two projections.

use crate::view::DocumentView;
use std::collections::BTreeSet;
use vfsync_protocol::{Key, Operation, Patch, Value};

/// Smallest complete patch list turning `from` into `to`.
///
/// Keys are visited in key order and each differing key yields exactly one
/// patch:
///
/// - present only in `from`: `delete`
/// - present only in `to`: `put`
/// - text on both sides: one `splice` covering the changed middle
/// - counters on both sides: `increment` by the difference
/// - anything else: `put`
///
/// Applying the result to `from` with [`apply`](crate::apply) yields `to`.
#[must_use]
pub fn diff(from: &DocumentView, to: &DocumentView) -> Vec<Patch> {
    let keys: BTreeSet<Key> = from
        .entries()
        .map(|(k, _)| k)
        .chain(to.entries().map(|(k, _)| k))
        .collect();

    keys.into_iter()
        .filter_map(|key| diff_leaf(&key, from.get(&key), to.get(&key)))
        .collect()
}

fn diff_leaf(key: &Key, before: Option<&Value>, after: Option<&Value>) -> Option<Patch> {
    match (before, after) {
        (None, None) => None,
        (Some(_), None) => Some(Operation::delete(key.clone())),
        (None, Some(value)) => Some(Operation::put(key.clone(), value.clone())),
        (Some(a), Some(b)) if a == b => None,
        (Some(Value::Text(a)), Some(Value::Text(b))) => Some(text_splice(key, a, b)),
        (Some(Value::Counter(a)), Some(Value::Counter(b))) => match b.checked_sub(*a) {
            Some(delta) => Some(Operation::increment(key.clone(), delta)),
            None => Some(Operation::put(key.clone(), Value::Counter(*b))),
        },
        (Some(_), Some(value)) => Some(Operation::put(key.clone(), value.clone())),
    }
}

fn text_splice(key: &Key, before: &str, after: &str) -> Operation {
    let a: Vec<char> = before.chars().collect();
    let b: Vec<char> = after.chars().collect();

    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let max_suffix = a.len().min(b.len()) - prefix;
    let suffix = a
        .iter()
        .rev()
        .zip(b.iter().rev())
        .take(max_suffix)
        .take_while(|(x, y)| x == y)
        .count();

    let inserted: String = b[prefix..b.len() - suffix].iter().collect();
    let deleted = a.len() - prefix - suffix;
    if deleted == 0 {
        Operation::insert(key.clone(), prefix, inserted)
    } else {
        Operation::splice(key.clone(), prefix, deleted, inserted)
    }
}

/// Keys touched by a patch list.
pub(crate) fn touched_keys(patches: &[Patch]) -> BTreeSet<Key> {
    patches.iter().map(|p| p.key.clone()).collect()
}
