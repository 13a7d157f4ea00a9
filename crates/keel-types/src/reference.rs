use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::hash::Hash;
use crate::request::TransactionRequest;

/// Content-derived identifier of an admitted transaction request.
///
/// Computed as a domain-separated BLAKE3 hash of the request's canonical
/// encoding, so two byte-identical requests always share a reference. The
/// store uses this to refuse delivering the same request twice.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionReference(Hash);

impl TransactionReference {
    /// Derive the reference of a request.
    pub fn of(request: &TransactionRequest) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"keel-request-v1:");
        hasher.update(&request.encode());
        Self(Hash::from_raw(*hasher.finalize().as_bytes()))
    }

    /// Wrap a raw hash. Use [`Self::of`] for production code.
    pub const fn from_hash(hash: Hash) -> Self {
        Self(hash)
    }

    /// The underlying hash.
    pub fn hash(&self) -> &Hash {
        &self.0
    }

    /// The raw 32 bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Full hex-encoded string.
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// Short identifier (first 8 hex characters).
    pub fn short_hex(&self) -> String {
        self.0.short_hex()
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        Hash::from_hex(s).map(Self)
    }
}

impl fmt::Debug for TransactionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionReference({})", self.short_hex())
    }
}

impl fmt::Display for TransactionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Reference to an object living in the store.
///
/// An object is named by the transaction that created it plus a progressive
/// index, unique within that transaction, chosen by the transaction
/// processor. The textual form is `<transaction-hex>#<progressive-hex>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageReference {
    /// The transaction that created the object.
    pub transaction: TransactionReference,
    /// Index of the object among those created by `transaction`.
    pub progressive: u64,
}

impl StorageReference {
    pub fn new(transaction: TransactionReference, progressive: u64) -> Self {
        Self {
            transaction,
            progressive,
        }
    }

    /// Fixed-width binary key: 32 bytes of transaction followed by the
    /// big-endian progressive.
    pub fn to_key_bytes(&self) -> [u8; 40] {
        let mut key = [0u8; 40];
        key[..32].copy_from_slice(self.transaction.as_bytes());
        key[32..].copy_from_slice(&self.progressive.to_be_bytes());
        key
    }
}

impl fmt::Debug for StorageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StorageReference({}#{:x})",
            self.transaction.short_hex(),
            self.progressive
        )
    }
}

impl fmt::Display for StorageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:x}", self.transaction, self.progressive)
    }
}

impl FromStr for StorageReference {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tx, progressive) = s
            .split_once('#')
            .ok_or_else(|| TypeError::InvalidReference(s.to_string()))?;
        let transaction = TransactionReference::from_hex(tx)?;
        let progressive = u64::from_str_radix(progressive, 16)
            .map_err(|e| TypeError::InvalidReference(format!("{s}: {e}")))?;
        Ok(Self::new(transaction, progressive))
    }
}
