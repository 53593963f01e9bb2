//! Actor, change and frontier identifiers.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Identifies one writer (a process, tab or backend) producing changes.
///
/// Actor ids break ties between concurrent changes, so their ordering is
/// part of the replay contract.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(Uuid);

impl ActorId {
    /// Creates a new random actor id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an actor id from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Creates a deterministic actor id, handy in tests.
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorId({})", self.0)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content address of a [`Change`](crate::Change): SHA-256 of its encoding.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeId([u8; 32]);

impl ChangeId {
    /// Wraps a raw digest.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form of the full digest.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// First twelve hex digits, for logs.
    #[must_use]
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }

    /// Parses the 64-digit hex form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidChangeId`] for anything else.
    pub fn from_hex(text: &str) -> ProtocolResult<Self> {
        let text = text.trim();
        if text.len() != 64 || !text.is_ascii() {
            return Err(ProtocolError::InvalidChangeId(text.to_string()));
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&text[i * 2..i * 2 + 2], 16)
                .map_err(|_| ProtocolError::InvalidChangeId(text.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Debug for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeId({})", self.short())
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// The frontier of a causal history: change ids with no known descendants.
///
/// Heads are the only version pointer. They are a small owned set, so
/// undo stacks hold heads rather than document copies.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Heads(BTreeSet<ChangeId>);

impl Heads {
    /// The empty frontier of an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no change has been applied yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of concurrent tips.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether `id` is one of the tips.
    #[must_use]
    pub fn contains(&self, id: &ChangeId) -> bool {
        self.0.contains(id)
    }

    /// Iterates tips in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ChangeId> + '_ {
        self.0.iter()
    }

    /// Tips as a sorted vector, the form stored in a change's parents.
    #[must_use]
    pub fn to_vec(&self) -> Vec<ChangeId> {
        self.0.iter().copied().collect()
    }

    /// Moves the frontier past a newly added change.
    pub fn advance(&mut self, parents: &[ChangeId], id: ChangeId) {
        for parent in parents {
            self.0.remove(parent);
        }
        self.0.insert(id);
    }
}

impl FromIterator<ChangeId> for Heads {
    fn from_iter<I: IntoIterator<Item = ChangeId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Debug for Heads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.iter().map(ChangeId::short)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_id_hex_round_trip() {
        let mut raw = [0u8; 32];
        raw[0] = 0xab;
        raw[31] = 0x01;
        let id = ChangeId::from_bytes(raw);
        let hex = id.to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("ab00"));
        assert_eq!(ChangeId::from_hex(&hex).unwrap(), id);
        assert_eq!(id.short(), "ab0000000000");
    }

    #[test]
    fn change_id_rejects_bad_hex() {
        assert!(ChangeId::from_hex("abc").is_err());
        assert!(ChangeId::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn heads_advance_replaces_parents() {
        let a = ChangeId::from_bytes([1; 32]);
        let b = ChangeId::from_bytes([2; 32]);
        let c = ChangeId::from_bytes([3; 32]);
        let mut heads: Heads = [a, b].into_iter().collect();
        heads.advance(&[a, b], c);
        assert_eq!(heads.to_vec(), vec![c]);

        heads.advance(&[], a);
        assert_eq!(heads.len(), 2);
        assert!(heads.contains(&a) && heads.contains(&c));
    }

    #[test]
    fn actor_order_is_total() {
        assert!(ActorId::from_u128(1) < ActorId::from_u128(2));
    }
}
