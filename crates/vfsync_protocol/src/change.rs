//! Immutable causal history nodes.

use crate::codec::{from_cbor, to_cbor};
use crate::error::ProtocolResult;
use crate::ids::{ActorId, ChangeId, Heads};
use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One node of the causal DAG.
///
/// A change is identified by the SHA-256 of its CBOR encoding, so two
/// replicas that receive the same change agree on its id without
/// coordination. `parents` is kept sorted and deduplicated so the encoding
/// is independent of how the frontier was iterated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Writer that produced the change.
    pub actor: ActorId,
    /// Per-actor sequence number, starting at 1.
    pub seq: u64,
    /// Heads the writer observed when producing the change.
    pub parents: Vec<ChangeId>,
    /// Wall-clock time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Optional human description (snapshot messages).
    pub message: Option<String>,
    /// Optional author name.
    pub author: Option<String>,
    /// Edits, applied in order.
    pub operations: Vec<Operation>,
}

impl Change {
    /// Creates a change on top of `parents`.
    pub fn new(
        actor: ActorId,
        seq: u64,
        parents: impl IntoIterator<Item = ChangeId>,
        operations: Vec<Operation>,
    ) -> Self {
        let mut parents: Vec<ChangeId> = parents.into_iter().collect();
        parents.sort_unstable();
        parents.dedup();
        Self {
            actor,
            seq,
            parents,
            timestamp_ms: 0,
            message: None,
            author: None,
            operations,
        }
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the author.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// The parents as a frontier.
    #[must_use]
    pub fn parent_heads(&self) -> Heads {
        self.parents.iter().copied().collect()
    }

    /// Encodes the change.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes a change.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not an encoded change.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }

    /// Content address of an already encoded change.
    #[must_use]
    pub fn id_of_encoding(encoded: &[u8]) -> ChangeId {
        ChangeId::from_bytes(Sha256::digest(encoded).into())
    }

    /// Computes this change's content address.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn id(&self) -> ProtocolResult<ChangeId> {
        Ok(Self::id_of_encoding(&self.encode()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Key;

    fn sample(parents: Vec<ChangeId>) -> Change {
        Change::new(
            ActorId::from_u128(7),
            1,
            parents,
            vec![Operation::put(Key::file("/a.txt"), "hi")],
        )
        .with_timestamp(1_700_000_000_000)
    }

    #[test]
    fn id_ignores_parent_order() {
        let p1 = ChangeId::from_bytes([1; 32]);
        let p2 = ChangeId::from_bytes([2; 32]);
        let a = sample(vec![p2, p1, p2]);
        let b = sample(vec![p1, p2]);
        assert_eq!(a.parents, vec![p1, p2]);
        assert_eq!(a.id().unwrap(), b.id().unwrap());
    }

    #[test]
    fn id_tracks_content() {
        let base = sample(vec![]);
        let messaged = base.clone().with_message("checkpoint");
        assert_ne!(base.id().unwrap(), messaged.id().unwrap());
    }

    #[test]
    fn decode_preserves_id() {
        let change = sample(vec![ChangeId::from_bytes([9; 32])]).with_author("dev");
        let bytes = change.encode().unwrap();
        let decoded = Change::decode(&bytes).unwrap();
        assert_eq!(decoded, change);
        assert_eq!(Change::id_of_encoding(&bytes), change.id().unwrap());
    }
}
