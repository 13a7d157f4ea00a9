use std::fmt;

use keel_crypto::ContentHasher;
use keel_types::{Hash, StorageReference, Timestamp, TypeError};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Identifier of a committed store snapshot: the hash of its [`StateRecord`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(Hash);

impl StateId {
    pub const fn from_hash(hash: Hash) -> Self {
        Self(hash)
    }

    pub fn hash(&self) -> &Hash {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    pub fn short_hex(&self) -> String {
        self.0.short_hex()
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        Hash::from_hex(s).map(Self)
    }
}

impl fmt::Debug for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateId({})", self.short_hex())
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Everything needed to reopen a snapshot: the roots of its three tries plus
/// the scalar state that is not keyed by reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Root of the trie from transaction reference to request.
    pub requests: Option<Hash>,
    /// Root of the trie from transaction reference to response.
    pub responses: Option<Hash>,
    /// Root of the trie from storage reference to history.
    pub histories: Option<Hash>,
    pub manifest: Option<StorageReference>,
    /// Snapshot this one was committed on top of.
    pub parent: Option<StateId>,
    /// Number of blocks committed in this lineage.
    pub height: u64,
    /// Block time of the last committed block.
    pub now: Timestamp,
}

impl StateRecord {
    /// The empty store every lineage starts from.
    pub fn genesis() -> Self {
        Self {
            requests: None,
            responses: None,
            histories: None,
            manifest: None,
            parent: None,
            height: 0,
            now: Timestamp::zero(),
        }
    }

    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Decode a record read under `id`. Bytes that do not hash to `id` in the
    /// state domain are not a state record.
    pub fn decode(id: &StateId, bytes: &[u8]) -> StoreResult<Self> {
        if !ContentHasher::STATE.verify(bytes, id.hash()) {
            return Err(StoreError::UnknownRoot(*id));
        }
        bincode::deserialize(bytes).map_err(|e| StoreError::Corrupt(format!("state {id}: {e}")))
    }

    /// Identifier of an encoded record.
    pub fn id_of(bytes: &[u8]) -> StateId {
        StateId(ContentHasher::STATE.hash(bytes))
    }
}
