//! Content-addressed arena of changes.

use crate::error::{CoreError, CoreResult};
use crate::view::DocumentView;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use vfsync_protocol::{ActorId, Change, ChangeId, Heads};

/// The causal DAG: every change ever seen, keyed by id.
///
/// Changes are only ever added, and only after all their parents, so
/// insertion order is already a valid causal order.
#[derive(Debug, Default, Clone)]
pub struct ChangeGraph {
    changes: HashMap<ChangeId, Arc<Change>>,
    insertion: Vec<ChangeId>,
    max_seq: HashMap<ActorId, u64>,
}

impl ChangeGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Whether the graph is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Whether `id` is known.
    #[must_use]
    pub fn contains(&self, id: &ChangeId) -> bool {
        self.changes.contains_key(id)
    }

    /// Looks up a change.
    #[must_use]
    pub fn get(&self, id: &ChangeId) -> Option<&Arc<Change>> {
        self.changes.get(id)
    }

    /// Parents of `change` that are not in the graph.
    #[must_use]
    pub fn missing_parents(&self, change: &Change) -> Vec<ChangeId> {
        change
            .parents
            .iter()
            .filter(|p| !self.changes.contains_key(p))
            .copied()
            .collect()
    }

    /// Next sequence number for `actor`.
    #[must_use]
    pub fn next_seq(&self, actor: &ActorId) -> u64 {
        self.max_seq.get(actor).copied().unwrap_or(0) + 1
    }

    /// Adds a change whose parents are all present.
    ///
    /// Returns `false` if the id was already known.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConflictRejected`] if a parent is missing.
    pub fn insert(&mut self, id: ChangeId, change: Arc<Change>) -> CoreResult<bool> {
        if self.changes.contains_key(&id) {
            return Ok(false);
        }
        let missing = self.missing_parents(&change);
        if !missing.is_empty() {
            return Err(CoreError::conflict_rejected(missing));
        }
        let seq = self.max_seq.entry(change.actor).or_insert(0);
        *seq = (*seq).max(change.seq);
        self.changes.insert(id, change);
        self.insertion.push(id);
        Ok(true)
    }

    /// Ids of changes nobody depends on.
    #[must_use]
    pub fn frontier(&self) -> Heads {
        let mut with_children: HashSet<&ChangeId> = HashSet::new();
        for change in self.changes.values() {
            with_children.extend(change.parents.iter());
        }
        self.insertion
            .iter()
            .filter(|id| !with_children.contains(id))
            .copied()
            .collect()
    }

    /// Every change reachable from `heads`, heads included.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownChange`] if a head is not in the graph.
    pub fn ancestors(&self, heads: &Heads) -> CoreResult<HashSet<ChangeId>> {
        let mut seen = HashSet::new();
        let mut stack: Vec<ChangeId> = Vec::new();
        for head in heads.iter() {
            if !self.changes.contains_key(head) {
                return Err(CoreError::UnknownChange { id: *head });
            }
            stack.push(*head);
        }
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(change) = self.changes.get(&id) {
                stack.extend(change.parents.iter().filter(|p| !seen.contains(p)));
            }
        }
        Ok(seen)
    }

    /// Deterministic topological order of `subset`.
    ///
    /// Among changes whose parents are all emitted, the one with the lowest
    /// `(actor, seq, id)` goes first. The result depends only on the set of
    /// changes, never on arrival order, which is what makes merging
    /// commutative.
    #[must_use]
    pub fn topological(&self, subset: &HashSet<ChangeId>) -> Vec<ChangeId> {
        let mut pending: HashMap<ChangeId, usize> = HashMap::with_capacity(subset.len());
        let mut children: HashMap<ChangeId, Vec<ChangeId>> = HashMap::new();
        let mut ready: BTreeSet<(ActorId, u64, ChangeId)> = BTreeSet::new();

        for id in subset {
            let Some(change) = self.changes.get(id) else {
                continue;
            };
            let in_set: Vec<&ChangeId> =
                change.parents.iter().filter(|p| subset.contains(p)).collect();
            for parent in &in_set {
                children.entry(**parent).or_default().push(*id);
            }
            if in_set.is_empty() {
                ready.insert((change.actor, change.seq, *id));
            } else {
                pending.insert(*id, in_set.len());
            }
        }

        let mut order = Vec::with_capacity(subset.len());
        while let Some(next) = ready.pop_first() {
            let id = next.2;
            order.push(id);
            for child in children.get(&id).into_iter().flatten() {
                let Some(count) = pending.get_mut(child) else {
                    continue;
                };
                *count -= 1;
                if *count == 0 {
                    pending.remove(child);
                    if let Some(change) = self.changes.get(child) {
                        ready.insert((change.actor, change.seq, *child));
                    }
                }
            }
        }
        order
    }

    /// Every change, in deterministic topological order.
    #[must_use]
    pub fn ordered(&self) -> Vec<ChangeId> {
        let all: HashSet<ChangeId> = self.insertion.iter().copied().collect();
        self.topological(&all)
    }

    /// Replays the history reachable from `heads` into a fresh projection.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownChange`] if a head is not in the graph.
    pub fn materialize(&self, heads: &Heads) -> CoreResult<DocumentView> {
        let reachable = self.ancestors(heads)?;
        let mut view = DocumentView::new();
        for id in self.topological(&reachable) {
            if let Some(change) = self.changes.get(&id) {
                for op in &change.operations {
                    view.apply_operation(op);
                }
            }
        }
        Ok(view)
    }

    /// Changes in insertion order, parents before children.
    pub fn iter(&self) -> impl Iterator<Item = (&ChangeId, &Arc<Change>)> + '_ {
        self.insertion
            .iter()
            .filter_map(|id| self.changes.get(id).map(|c| (id, c)))
    }
}
