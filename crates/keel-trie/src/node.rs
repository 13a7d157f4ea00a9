use keel_crypto::ContentHasher;
use keel_types::Hash;
use serde::{Deserialize, Serialize};

use crate::error::{TrieError, TrieResult};
use crate::nibbles::Nibbles;

// ---------------------------------------------------------------------------
// TrieNode
// ---------------------------------------------------------------------------

/// Node types of the Merkle-Patricia trie.
///
/// All keys have the same length, so no key ends inside another key's path
/// and branches never carry a value. The empty trie is represented by the
/// absence of a root rather than by a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrieNode {
    /// Remaining key path and the value stored under the key.
    Leaf { path: Nibbles, value: Vec<u8> },
    /// Shared path prefix leading to a single branch.
    Extension { path: Nibbles, child: Hash },
    /// 16-way fork on the next nibble.
    Branch { children: Box<[Option<Hash>; 16]> },
}

impl TrieNode {
    /// A branch with no children yet.
    pub fn empty_branch() -> Self {
        TrieNode::Branch {
            children: Box::new([None; 16]),
        }
    }

    /// Canonical encoding; the node's address is the hash of these bytes.
    pub fn encode(&self) -> TrieResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| TrieError::Serialization(e.to_string()))
    }

    /// Decode bytes read from `hash`, checking they really hash to it.
    pub fn decode(hash: &Hash, bytes: &[u8]) -> TrieResult<Self> {
        if !ContentHasher::TRIE_NODE.verify(bytes, hash) {
            return Err(TrieError::CorruptNode {
                hash: *hash,
                reason: "content does not match address".into(),
            });
        }
        bincode::deserialize(bytes).map_err(|e| TrieError::CorruptNode {
            hash: *hash,
            reason: e.to_string(),
        })
    }

    /// Address of an encoded node.
    pub fn address(bytes: &[u8]) -> Hash {
        ContentHasher::TRIE_NODE.hash(bytes)
    }

    /// Hashes of the nodes this node points to.
    pub fn children(&self) -> Vec<Hash> {
        match self {
            TrieNode::Leaf { .. } => Vec::new(),
            TrieNode::Extension { child, .. } => vec![*child],
            TrieNode::Branch { children } => children.iter().flatten().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf() -> TrieNode {
        TrieNode::Leaf {
            path: Nibbles::from_slice(&[1, 2, 3]),
            value: vec![0xAB, 0xCD],
        }
    }

    #[test]
    fn encode_decode_checks_address() {
        let bytes = leaf().encode().unwrap();
        let hash = TrieNode::address(&bytes);
        assert_eq!(TrieNode::decode(&hash, &bytes).unwrap(), leaf());
    }

    #[test]
    fn decode_rejects_mismatched_address() {
        let bytes = leaf().encode().unwrap();
        let wrong = TrieNode::address(b"something else");
        assert!(matches!(
            TrieNode::decode(&wrong, &bytes),
            Err(TrieError::CorruptNode { .. })
        ));
    }

    #[test]
    fn equal_nodes_share_an_address() {
        let a = TrieNode::address(&leaf().encode().unwrap());
        let b = TrieNode::address(&leaf().clone().encode().unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn children_lists_set_slots() {
        let child = Hash::of(b"child");
        let mut slots = [None; 16];
        slots[3] = Some(child);
        slots[9] = Some(child);
        let branch = TrieNode::Branch {
            children: Box::new(slots),
        };
        assert_eq!(branch.children(), vec![child, child]);
        assert!(leaf().children().is_empty());
        assert!(TrieNode::empty_branch().children().is_empty());
    }
}
