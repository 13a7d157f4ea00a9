use std::collections::HashMap;
use std::sync::RwLock;

use keel_types::Hash;

use crate::error::TrieResult;
use crate::traits::NodeStore;

/// In-memory, HashMap-based node store.
///
/// Intended for tests and embedding. Everything is lost when the store is
/// dropped.
pub struct InMemoryNodeStore {
    entries: RwLock<HashMap<Hash, Vec<u8>>>,
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("lock poisoned").is_empty()
    }
}

impl Default for InMemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryNodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryNodeStore")
            .field("entries", &self.len())
            .finish()
    }
}

impl NodeStore for InMemoryNodeStore {
    fn read(&self, hash: &Hash) -> TrieResult<Option<Vec<u8>>> {
        Ok(self.entries.read().expect("lock poisoned").get(hash).cloned())
    }

    fn write_batch(&self, batch: &[(Hash, Vec<u8>)]) -> TrieResult<()> {
        let mut entries = self.entries.write().expect("lock poisoned");
        for (hash, bytes) in batch {
            entries.entry(*hash).or_insert_with(|| bytes.clone());
        }
        Ok(())
    }

    fn contains(&self, hash: &Hash) -> TrieResult<bool> {
        Ok(self.entries.read().expect("lock poisoned").contains_key(hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let store = InMemoryNodeStore::new();
        let hash = Hash::of(b"node");
        store.write_batch(&[(hash, b"node".to_vec())]).unwrap();
        assert_eq!(store.read(&hash).unwrap(), Some(b"node".to_vec()));
        assert!(store.contains(&hash).unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn read_missing_returns_none() {
        let store = InMemoryNodeStore::default();
        assert!(store.is_empty());
        assert_eq!(store.read(&Hash::of(b"absent")).unwrap(), None);
    }

    #[test]
    fn rewriting_an_entry_is_a_noop() {
        let store = InMemoryNodeStore::new();
        let hash = Hash::of(b"x");
        store.write_batch(&[(hash, b"x".to_vec())]).unwrap();
        store.write_batch(&[(hash, b"x".to_vec())]).unwrap();
        assert_eq!(store.len(), 1);
    }
}
