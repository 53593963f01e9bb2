//! Named checkpoints in the causal history.

use crate::change_feed::Origin;
use crate::error::{CoreError, CoreResult};
use crate::patch::diff;
use crate::store::VersionedDocumentStore;
use crate::view::DocumentView;
use std::collections::BTreeMap;
use std::sync::Arc;
use vfsync_protocol::{ChangeId, Heads, Value};

/// Metadata key stamped by every snapshot.
pub const LAST_SNAPSHOT_KEY: &str = "lastSnapshotAt";

/// One history entry as shown to users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Change id; pass to [`SnapshotManager::restore_snapshot`].
    pub id: ChangeId,
    /// Commit time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Message, if the change carried one.
    pub message: Option<String>,
    /// Author, if known.
    pub author: Option<String>,
    /// Files as of this change.
    pub files: BTreeMap<String, Value>,
}

impl Snapshot {
    /// Whether this entry is an explicit checkpoint rather than a plain edit.
    #[must_use]
    pub fn is_checkpoint(&self) -> bool {
        self.message.is_some()
    }
}

/// What a restore did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// The safety snapshot taken first.
    pub safety_snapshot: ChangeId,
    /// Snapshot that was restored.
    pub restored: ChangeId,
    /// Number of file patches applied.
    pub patches: usize,
    /// Heads after the restore.
    pub heads: Heads,
}

/// Creates and restores checkpoints.
///
/// Restores are forward edits: the history only grows, so a restore can be
/// undone like any other edit.
#[derive(Debug)]
pub struct SnapshotManager {
    store: Arc<VersionedDocumentStore>,
}

impl SnapshotManager {
    /// Creates a manager for `store`.
    #[must_use]
    pub fn new(store: Arc<VersionedDocumentStore>) -> Self {
        Self { store }
    }

    /// Stamps the current state with `message`.
    ///
    /// The stamp is its own change, so concurrent edits may land on either
    /// side of it.
    ///
    /// # Errors
    ///
    /// Returns a persistence error.
    pub fn create_snapshot(&self, message: &str) -> CoreResult<ChangeId> {
        let stamp = self.store.now_ms();
        let ((), id) = self.store.change_with_id(Origin::Snapshot, |tx| {
            tx.set_message(message);
            tx.put_meta(LAST_SNAPSHOT_KEY, Value::Counter(stamp as i64));
            Ok(())
        })?;
        let id = id.ok_or_else(|| CoreError::InvalidOperation {
            message: "snapshot recorded no change".to_string(),
        })?;
        tracing::info!(snapshot = %id.short(), label = message, "created snapshot");
        Ok(id)
    }

    /// Files as of snapshot `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownChange`] if `id` is not in the history.
    pub fn files_at(&self, id: &ChangeId) -> CoreResult<BTreeMap<String, Value>> {
        let heads: Heads = [*id].into_iter().collect();
        Ok(self.store.materialize(&heads)?.files().clone())
    }

    /// Makes the file map equal to snapshot `id`, after taking an automatic
    /// safety snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownChange`] if `id` is not in the history.
    pub fn restore_snapshot(&self, id: &ChangeId) -> CoreResult<RestoreReport> {
        let message = format!("Auto-save before restoring {}", id.short());
        self.checkout_and_save(id, &message)
    }

    /// Takes a safety snapshot named `safety_message`, then restores `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownChange`] if `id` is not in the history.
    pub fn checkout_and_save(&self, id: &ChangeId, safety_message: &str) -> CoreResult<RestoreReport> {
        let target_files = self.files_at(id)?;
        let safety_snapshot = self.create_snapshot(safety_message)?;

        let patches = self.store.change(Origin::Restore, |tx| {
            let current = tx.view().clone();
            let target = DocumentView::from_files(target_files).with_meta(current.meta().clone());
            let patches = diff(&current, &target);
            tx.set_message(format!("Restore {}", id.short()));
            let count = patches.len();
            for patch in patches {
                tx.push(patch);
            }
            Ok(count)
        })?;

        tracing::info!(restored = %id.short(), patches, "restored snapshot");
        Ok(RestoreReport {
            safety_snapshot,
            restored: *id,
            patches,
            heads: self.store.heads(),
        })
    }

    /// Every change in causal order with the files as of that change.
    ///
    /// # Errors
    ///
    /// Returns an error if the history cannot be replayed.
    pub fn history(&self) -> CoreResult<Vec<Snapshot>> {
        self.store
            .changes()
            .into_iter()
            .map(|(id, change)| {
                Ok(Snapshot {
                    id,
                    timestamp_ms: change.timestamp_ms,
                    message: change.message.clone(),
                    author: change.author.clone(),
                    files: self.files_at(&id)?,
                })
            })
            .collect()
    }

    /// Only the entries carrying a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the history cannot be replayed.
    pub fn snapshots(&self) -> CoreResult<Vec<Snapshot>> {
        Ok(self
            .history()?
            .into_iter()
            .filter(Snapshot::is_checkpoint)
            .collect())
    }
}
