//! The byte-store contract used by the history log.

use crate::error::StorageResult;

/// An append-oriented byte store.
///
/// Backends hold opaque bytes. The history log owns the record framing,
/// content-address checks and torn-tail handling; the backend only has to
/// keep appended bytes readable at the offsets it handed out.
///
/// # Invariants
///
/// - `append` returns the offset at which `data` now starts
/// - `read_at` returns exactly the bytes written at that offset
/// - after `sync` returns, appended bytes survive process exit
/// - `truncate` never grows the store
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`](crate::StorageError::ReadPastEnd)
    /// when the range leaves the store, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Current size in bytes, which is also the next append offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Forces data and metadata to stable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Drops every byte at or after `new_size`.
    ///
    /// The history log uses this to cut a partially written trailing record
    /// after a crash.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidTruncate`](crate::StorageError::InvalidTruncate)
    /// when `new_size` exceeds the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
