use std::collections::HashMap;
use std::sync::Arc;

use keel_crypto::ContentHasher;
use keel_types::Hash;

use crate::error::{TrieError, TrieResult};
use crate::nibbles::Nibbles;
use crate::node::TrieNode;
use crate::traits::NodeStore;

/// A persistent Merkle-Patricia trie rooted at one version.
///
/// Reads go through the node store; inserts build new nodes in an in-memory
/// overlay and never touch existing ones, so the root the trie was opened at
/// remains valid. Call [`Self::into_batch`] to obtain the new root together
/// with the nodes that must be written for it.
///
/// Keys of any length are accepted; they are hashed with
/// [`ContentHasher::TRIE_KEY`] to a fixed 64-nibble path.
pub struct MerklePatriciaTrie {
    store: Arc<dyn NodeStore>,
    root: Option<Hash>,
    pending: HashMap<Hash, (TrieNode, Vec<u8>)>,
}

impl MerklePatriciaTrie {
    /// Open the trie with the given root. `None` is the empty trie.
    pub fn open(store: Arc<dyn NodeStore>, root: Option<Hash>) -> Self {
        Self {
            store,
            root,
            pending: HashMap::new(),
        }
    }

    /// The current root, including pending inserts.
    pub fn root(&self) -> Option<Hash> {
        self.root
    }

    /// Returns `true` if inserts are waiting to be written.
    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    fn path_of(key: &[u8]) -> Nibbles {
        Nibbles::from_bytes(ContentHasher::TRIE_KEY.hash(key).as_bytes())
    }

    fn load(&self, hash: &Hash) -> TrieResult<TrieNode> {
        if let Some((node, _)) = self.pending.get(hash) {
            return Ok(node.clone());
        }
        let bytes = self
            .store
            .read(hash)?
            .ok_or(TrieError::MissingNode(*hash))?;
        TrieNode::decode(hash, &bytes)
    }

    fn put(&mut self, node: TrieNode) -> TrieResult<Hash> {
        let bytes = node.encode()?;
        let hash = TrieNode::address(&bytes);
        self.pending.entry(hash).or_insert((node, bytes));
        Ok(hash)
    }

    /// Look up the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> TrieResult<Option<Vec<u8>>> {
        let path = Self::path_of(key);
        let mut remaining = path.as_slice();
        let mut current = match self.root {
            Some(root) => root,
            None => return Ok(None),
        };

        loop {
            match self.load(&current)? {
                TrieNode::Leaf { path, value } => {
                    return Ok((path.as_slice() == remaining).then_some(value));
                }
                TrieNode::Extension { path, child } => {
                    if !remaining.starts_with(path.as_slice()) {
                        return Ok(None);
                    }
                    remaining = &remaining[path.len()..];
                    current = child;
                }
                TrieNode::Branch { children } => {
                    let Some((&nibble, rest)) = remaining.split_first() else {
                        return Err(TrieError::Malformed("branch at end of key".into()));
                    };
                    match children[nibble as usize] {
                        Some(child) => {
                            remaining = rest;
                            current = child;
                        }
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    /// Returns `true` if `key` is present.
    pub fn contains_key(&self, key: &[u8]) -> TrieResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Insert or overwrite the value stored under `key`.
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) -> TrieResult<()> {
        let path = Self::path_of(key);
        let root = self.insert_at(self.root, path.as_slice(), value)?;
        self.root = Some(root);
        Ok(())
    }

    fn insert_at(&mut self, node: Option<Hash>, path: &[u8], value: Vec<u8>) -> TrieResult<Hash> {
        let Some(hash) = node else {
            return self.put(TrieNode::Leaf {
                path: Nibbles::from_slice(path),
                value,
            });
        };

        match self.load(&hash)? {
            TrieNode::Leaf {
                path: existing,
                value: old,
            } => {
                if existing.as_slice() == path {
                    return self.put(TrieNode::Leaf {
                        path: existing,
                        value,
                    });
                }
                let common = existing.common_prefix_len(path);
                if common >= existing.len() || common >= path.len() {
                    return Err(TrieError::Malformed("leaf path is a prefix of a key".into()));
                }
                let old_leaf = self.put(TrieNode::Leaf {
                    path: Nibbles::from_slice(&existing.as_slice()[common + 1..]),
                    value: old,
                })?;
                let new_leaf = self.put(TrieNode::Leaf {
                    path: Nibbles::from_slice(&path[common + 1..]),
                    value,
                })?;
                let mut children = [None; 16];
                children[existing.at(common) as usize] = Some(old_leaf);
                children[path[common] as usize] = Some(new_leaf);
                let branch = self.put(TrieNode::Branch {
                    children: Box::new(children),
                })?;
                self.with_prefix(&path[..common], branch)
            }
            TrieNode::Extension {
                path: shared,
                child,
            } => {
                let common = shared.common_prefix_len(path);
                if common == shared.len() {
                    let child = self.insert_at(Some(child), &path[common..], value)?;
                    return self.put(TrieNode::Extension {
                        path: shared,
                        child,
                    });
                }
                if common >= path.len() {
                    return Err(TrieError::Malformed("key ends inside an extension".into()));
                }
                let rest = &shared.as_slice()[common + 1..];
                let old_child = if rest.is_empty() {
                    child
                } else {
                    self.put(TrieNode::Extension {
                        path: Nibbles::from_slice(rest),
                        child,
                    })?
                };
                let new_leaf = self.put(TrieNode::Leaf {
                    path: Nibbles::from_slice(&path[common + 1..]),
                    value,
                })?;
                let mut children = [None; 16];
                children[shared.at(common) as usize] = Some(old_child);
                children[path[common] as usize] = Some(new_leaf);
                let branch = self.put(TrieNode::Branch {
                    children: Box::new(children),
                })?;
                self.with_prefix(&path[..common], branch)
            }
            TrieNode::Branch { mut children } => {
                let Some((&nibble, rest)) = path.split_first() else {
                    return Err(TrieError::Malformed("branch at end of key".into()));
                };
                let child = self.insert_at(children[nibble as usize], rest, value)?;
                children[nibble as usize] = Some(child);
                self.put(TrieNode::Branch { children })
            }
        }
    }

    /// Put an extension over `child` unless `prefix` is empty.
    fn with_prefix(&mut self, prefix: &[u8], child: Hash) -> TrieResult<Hash> {
        if prefix.is_empty() {
            return Ok(child);
        }
        self.put(TrieNode::Extension {
            path: Nibbles::from_slice(prefix),
            child,
        })
    }

    /// Consume the trie, returning its root and the new nodes reachable from
    /// it. Nodes superseded by later inserts are dropped.
    pub fn into_batch(mut self) -> (Option<Hash>, Vec<(Hash, Vec<u8>)>) {
        let mut batch = Vec::new();
        let mut stack: Vec<Hash> = self.root.into_iter().collect();
        while let Some(hash) = stack.pop() {
            if let Some((node, bytes)) = self.pending.remove(&hash) {
                stack.extend(node.children());
                batch.push((hash, bytes));
            }
        }
        (self.root, batch)
    }
}

impl std::fmt::Debug for MerklePatriciaTrie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerklePatriciaTrie")
            .field("root", &self.root)
            .field("pending", &self.pending.len())
            .finish()
    }
}
