//! # vfsync storage
//!
//! The lowest layer of vfsync. Two concerns live here:
//!
//! - [`StorageBackend`]: an opaque, append-oriented byte store. The history
//!   log in `vfsync_core` frames encoded changes on top of it; the backend
//!   never interprets what it holds.
//! - [`PointerStore`]: a tiny durable key-value layer that maps a project id
//!   to the identifier of its history document. It is resolved once at
//!   project open.
//!
//! ## Available implementations
//!
//! - [`InMemoryBackend`] / [`MemoryPointerStore`] for tests and ephemeral projects
//! - [`FileBackend`] / [`FilePointerStore`] for persistence across sessions
//!
//! ## Example
//!
//! ```rust
//! use vfsync_storage::{InMemoryBackend, MemoryPointerStore, PointerStore, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"change bytes").unwrap();
//! assert_eq!(backend.read_at(offset, 6).unwrap(), b"change");
//!
//! let pointers = MemoryPointerStore::new();
//! pointers.set("project-1", "doc-abc").unwrap();
//! assert_eq!(pointers.get("project-1").unwrap().as_deref(), Some("doc-abc"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod pointer;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use pointer::{FilePointerStore, MemoryPointerStore, PointerStore};
