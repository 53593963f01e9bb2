//! # vfsync protocol
//!
//! Pure data types shared by every vfsync layer:
//!
//! - identifiers: [`ActorId`], [`ChangeId`] and the [`Heads`] frontier
//! - document leaves: [`Key`], [`Value`] and its [`ValueKind`] discriminant
//! - edits: [`Operation`] / [`Action`], grouped into an immutable [`Change`]
//! - backend wire messages: [`BackendRequest`] / [`BackendResponse`] and the
//!   adapter-facing result types ([`FileContent`], [`DirEntry`],
//!   [`CommandOutput`], [`WatchEvent`], [`WriteOutcome`], ...)
//! - deterministic CBOR encoding via `ciborium` and length-prefixed framing
//!
//! This crate performs no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod codec;
mod error;
mod ids;
mod messages;
mod operation;
mod path;
mod value;

pub use change::Change;
pub use codec::{decode_frame_len, encode_frame, from_cbor, to_cbor, FRAME_HEADER_LEN, MAX_FRAME_SIZE};
pub use error::{ProtocolError, ProtocolResult};
pub use ids::{ActorId, ChangeId, Heads};
pub use messages::{
    ArtifactLocator, BackendRequest, BackendResponse, CommandOutput, DirEntry, EntryKind,
    FileContent, FileStat, RequestFrame, ResponseFrame, WatchEvent, WatchEventKind, WriteOutcome,
    PROTOCOL_VERSION,
};
pub use operation::{Action, Operation, Patch};
pub use path::{file_name, is_under, normalize_path, parent_dir, rebase};
pub use value::{Key, Value, ValueKind};
