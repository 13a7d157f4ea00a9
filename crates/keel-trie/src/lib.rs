//! Persistent Merkle-Patricia trie for Keel.
//!
//! Tries are copy-on-write: inserting a key rewrites only the nodes on the
//! path to that key, so every earlier root stays readable and a new version
//! costs space proportional to what changed. Nodes are content-addressed and
//! live in a [`NodeStore`]:
//!
//! - [`InMemoryNodeStore`]: `HashMap` behind a lock, for tests and embedding
//! - [`LogNodeStore`]: append-only, CRC-framed log file with an in-memory index
//!
//! A [`MerklePatriciaTrie`] buffers new nodes in memory until
//! [`MerklePatriciaTrie::into_batch`] hands them over for one atomic
//! [`NodeStore::write_batch`].

pub mod error;
pub mod log;
pub mod memory;
pub mod nibbles;
pub mod node;
pub mod traits;
pub mod trie;

pub use error::{TrieError, TrieResult};
pub use log::{LogNodeStore, SyncMode};
pub use memory::InMemoryNodeStore;
pub use nibbles::Nibbles;
pub use node::TrieNode;
pub use traits::NodeStore;
pub use trie::MerklePatriciaTrie;
