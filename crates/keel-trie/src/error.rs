use std::io;

use keel_types::Hash;

/// Errors from trie and node store operations.
#[derive(Debug, thiserror::Error)]
pub enum TrieError {
    /// I/O error from the node log.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Node encoding or decoding failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A node referenced by the trie is not in the node store.
    #[error("missing trie node: {0}")]
    MissingNode(Hash),

    /// Stored bytes do not hash to the address they were read from.
    #[error("corrupt trie node {hash}: {reason}")]
    CorruptNode { hash: Hash, reason: String },

    /// The trie shape contradicts the fixed key length.
    #[error("malformed trie: {0}")]
    Malformed(String),
}

/// Result alias for trie operations.
pub type TrieResult<T> = Result<T, TrieError>;
