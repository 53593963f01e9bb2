//! Durable, content-addressed change history.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────┬─────────────────────────────────────────────┐
//! │ magic (8B)   │ "VFSYNCH1"                                  │
//! ├──────────────┼─────────────────────────────────────────────┤
//! │ record       │ len (u32 BE) │ change id (32B) │ CBOR bytes │
//! │ record       │ ...                                         │
//! └──────────────┴─────────────────────────────────────────────┘
//! ```
//!
//! Records are written parents-first. On open every record's id is checked
//! against the SHA-256 of its bytes. A trailing record cut short by a crash
//! is dropped and the store truncated back to the last whole record.

use crate::error::{CoreError, CoreResult};
use vfsync_protocol::{Change, ChangeId};
use vfsync_storage::StorageBackend;

const MAGIC: &[u8; 8] = b"VFSYNCH1";
const RECORD_HEADER: usize = 4 + 32;

/// Append-only change log over a [`StorageBackend`].
pub struct HistoryLog {
    backend: Box<dyn StorageBackend>,
    sync_on_append: bool,
    records: usize,
}

impl HistoryLog {
    /// Opens a log, replaying every intact record.
    ///
    /// Returns the log and the recovered changes in write order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::HistoryCorrupted`] if the magic is wrong, a
    /// record's id does not match its bytes, or a record fails to decode.
    pub fn open(
        mut backend: Box<dyn StorageBackend>,
        sync_on_append: bool,
    ) -> CoreResult<(Self, Vec<(ChangeId, Change)>)> {
        let size = backend.size()?;
        if size == 0 {
            backend.append(MAGIC)?;
            backend.flush()?;
            let log = Self {
                backend,
                sync_on_append,
                records: 0,
            };
            return Ok((log, Vec::new()));
        }

        if size < MAGIC.len() as u64 || backend.read_at(0, MAGIC.len())? != MAGIC {
            return Err(CoreError::history_corrupted(0, "bad magic"));
        }

        let mut changes = Vec::new();
        let mut offset = MAGIC.len() as u64;
        while offset < size {
            if size - offset < RECORD_HEADER as u64 {
                break;
            }
            let header = backend.read_at(offset, RECORD_HEADER)?;
            let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
            if size - offset - (RECORD_HEADER as u64) < len {
                break;
            }
            let mut raw_id = [0u8; 32];
            raw_id.copy_from_slice(&header[4..]);
            let stored = ChangeId::from_bytes(raw_id);

            let body = backend.read_at(offset + RECORD_HEADER as u64, len as usize)?;
            let actual = Change::id_of_encoding(&body);
            if actual != stored {
                return Err(CoreError::history_corrupted(
                    offset,
                    format!("record claims {} but hashes to {}", stored.short(), actual.short()),
                ));
            }
            let change = Change::decode(&body)
                .map_err(|e| CoreError::history_corrupted(offset, e.to_string()))?;
            changes.push((stored, change));
            offset += RECORD_HEADER as u64 + len;
        }

        if offset < size {
            tracing::warn!(
                dropped = size - offset,
                records = changes.len(),
                "dropping torn record at end of history"
            );
            backend.truncate(offset)?;
        }

        let log = Self {
            backend,
            sync_on_append,
            records: changes.len(),
        };
        Ok((log, changes))
    }

    /// Appends an encoded change.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or sync fails; nothing is committed in
    /// memory in that case.
    pub fn append(&mut self, id: &ChangeId, encoded: &[u8]) -> CoreResult<()> {
        let mut record = Vec::with_capacity(RECORD_HEADER + encoded.len());
        record.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
        record.extend_from_slice(id.as_bytes());
        record.extend_from_slice(encoded);
        self.backend.append(&record)?;
        self.backend.flush()?;
        if self.sync_on_append {
            self.backend.sync()?;
        }
        self.records += 1;
        Ok(())
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
    }

    /// Whether the log holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Forces everything to stable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.backend.flush()?;
        self.backend.sync()?;
        Ok(())
    }
}

impl std::fmt::Debug for HistoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryLog")
            .field("records", &self.records)
            .field("sync_on_append", &self.sync_on_append)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfsync_protocol::{ActorId, Key, Operation};
    use vfsync_storage::InMemoryBackend;

    fn change(seq: u64, parents: Vec<ChangeId>) -> (ChangeId, Vec<u8>) {
        let c = Change::new(
            ActorId::from_u128(1),
            seq,
            parents,
            vec![Operation::put(Key::file("/x"), format!("v{seq}"))],
        );
        let bytes = c.encode().unwrap();
        (Change::id_of_encoding(&bytes), bytes)
    }

    #[test]
    fn replays_written_records() {
        let store = InMemoryBackend::new();
        let (mut log, recovered) = HistoryLog::open(Box::new(store.clone()), false).unwrap();
        assert!(recovered.is_empty());
        let (a, a_bytes) = change(1, vec![]);
        let (b, b_bytes) = change(2, vec![a]);
        log.append(&a, &a_bytes).unwrap();
        log.append(&b, &b_bytes).unwrap();
        drop(log);

        let (log, recovered) = HistoryLog::open(Box::new(store), false).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(recovered.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(recovered[1].1.parents, vec![a]);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let store = InMemoryBackend::new();
        let (mut log, _) = HistoryLog::open(Box::new(store.clone()), false).unwrap();
        let (a, a_bytes) = change(1, vec![]);
        log.append(&a, &a_bytes).unwrap();
        let good_len = store.snapshot().len();
        drop(log);

        let mut bytes = store.snapshot();
        bytes.extend_from_slice(&[0, 0, 0, 50, 1, 2, 3]);
        let torn = InMemoryBackend::with_data(bytes);
        let (log, recovered) = HistoryLog::open(Box::new(torn.clone()), false).unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(log.len(), 1);
        assert_eq!(torn.snapshot().len(), good_len);
    }

    #[test]
    fn tampered_record_is_corruption() {
        let store = InMemoryBackend::new();
        let (mut log, _) = HistoryLog::open(Box::new(store.clone()), false).unwrap();
        let (a, a_bytes) = change(1, vec![]);
        log.append(&a, &a_bytes).unwrap();
        drop(log);

        let mut bytes = store.snapshot();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let result = HistoryLog::open(Box::new(InMemoryBackend::with_data(bytes)), false);
        assert!(matches!(result, Err(CoreError::HistoryCorrupted { offset: 8, .. })));
    }

    #[test]
    fn foreign_file_is_rejected() {
        let result = HistoryLog::open(Box::new(InMemoryBackend::with_data(b"garbage!!".to_vec())), false);
        assert!(matches!(result, Err(CoreError::HistoryCorrupted { offset: 0, .. })));
    }
}
