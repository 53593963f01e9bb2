//! # vfsync core
//!
//! A project's file set as a causally versioned, mergeable document.
//!
//! ## Architecture
//!
//! - [`VersionedDocumentStore`]: arena of content-addressed changes, the
//!   current [`Heads`](vfsync_protocol::Heads) and the projection derived
//!   from them. Mutation goes through [`VersionedDocumentStore::change`].
//! - [`diff`] / [`apply`]: patch computation between two projections and
//!   its replay.
//! - [`ChangeFeed`]: one [`DocumentEvent`] per committed change.
//! - [`UndoRedoManager`]: heads stacks with forward-edit replay.
//! - [`SnapshotManager`]: named checkpoints and restores.
//! - [`DependencyManifestManager`]: the dependency table derived from
//!   [`MANIFEST_PATH`].
//! - [`HistoryLog`] / [`ProjectRepository`]: durable history located
//!   through a per-project pointer.
//!
//! ## Merge semantics
//!
//! The projection at any heads is the replay of every reachable change in a
//! topological order that breaks ties by `(actor, seq)`. The order depends
//! only on the set of changes, so replicas holding the same changes hold the
//! same projection regardless of arrival order.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vfsync_core::{DocumentConfig, Origin, UndoRedoManager, VersionedDocumentStore};
//!
//! let store = Arc::new(VersionedDocumentStore::new(DocumentConfig::default()));
//! let mut undo = UndoRedoManager::new(Arc::clone(&store));
//!
//! store.change(Origin::Local, |tx| tx.put_text("/main.ts", "let x = 1;")).unwrap();
//! store.change(Origin::Local, |tx| tx.splice_text("/main.ts", 8, 1, "2")).unwrap();
//! assert_eq!(store.get_text("/main.ts").as_deref(), Some("let x = 2;"));
//!
//! undo.undo().unwrap();
//! assert_eq!(store.get_text("/main.ts").as_deref(), Some("let x = 1;"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod clock;
mod config;
mod dag;
mod error;
mod history_log;
mod manifest;
mod patch;
mod repository;
mod snapshot;
mod store;
mod transaction;
mod undo;
mod view;

pub use change_feed::{ChangeFeed, DocumentEvent, GuardToken, Origin};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DocumentConfig, RepositoryConfig};
pub use dag::ChangeGraph;
pub use error::{CoreError, CoreResult};
pub use history_log::HistoryLog;
pub use manifest::{
    parse_dependencies, upsert_dependencies, DependencyManifestManager, DependencyTable,
    MANIFEST_PATH,
};
pub use patch::diff;
pub use repository::ProjectRepository;
pub use snapshot::{RestoreReport, Snapshot, SnapshotManager, LAST_SNAPSHOT_KEY};
pub use store::{MergeReport, VersionedDocumentStore};
pub use transaction::Transaction;
pub use undo::{UndoOutcome, UndoRedoManager, UndoState};
pub use view::{apply, DocumentView};
