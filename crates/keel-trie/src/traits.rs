use keel_types::Hash;

use crate::error::TrieResult;

/// Content-addressed backing store for trie nodes and state records.
///
/// All implementations must satisfy these invariants:
/// - Entries are immutable once written; the key is the hash of the bytes.
/// - A batch becomes visible all at once or not at all.
/// - Concurrent reads are always safe.
/// - The store never interprets the bytes it holds.
pub trait NodeStore: Send + Sync {
    /// Read an entry by hash.
    ///
    /// Returns `Ok(None)` if the entry does not exist.
    fn read(&self, hash: &Hash) -> TrieResult<Option<Vec<u8>>>;

    /// Write a batch of entries atomically. Entries already present are
    /// skipped.
    fn write_batch(&self, batch: &[(Hash, Vec<u8>)]) -> TrieResult<()>;

    /// Check whether an entry exists.
    ///
    /// Default implementation reads the entry. Backends with an index should
    /// override this.
    fn contains(&self, hash: &Hash) -> TrieResult<bool> {
        Ok(self.read(hash)?.is_some())
    }
}
