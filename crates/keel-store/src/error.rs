use keel_trie::TrieError;
use keel_types::{TransactionReference, TypeError};

use crate::state::StateId;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No transaction with this reference exists in the snapshot.
    #[error("unknown transaction reference: {0}")]
    UnknownReference(TransactionReference),

    /// No snapshot with this state id has been committed.
    #[error("unknown state root: {0}")]
    UnknownRoot(StateId),

    /// The transaction was rejected; the store is unchanged.
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// The block-closing reward transaction could not be delivered.
    #[error("reward transaction rejected: {0}")]
    RewardRejected(String),

    /// A conditional publish found a different current snapshot.
    #[error("head moved: expected {expected}, found {actual}")]
    HeadMoved { expected: StateId, actual: StateId },

    /// Failure of the underlying trie or node store.
    #[error("trie error: {0}")]
    Trie(#[from] TrieError),

    /// I/O error writing the archive or the HEAD file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Type(#[from] TypeError),

    /// Persisted data is not what the store wrote.
    #[error("corrupt store: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Returns `true` for rejections, which leave the store unchanged and are
    /// terminal for the request but not for the store.
    pub fn is_rejection(&self) -> bool {
        matches!(self, StoreError::Rejected(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
