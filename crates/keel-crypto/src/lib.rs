//! Content hashing for Keel.
//!
//! Every content-addressed value in Keel (trie nodes, trie keys, state
//! records) is hashed through a [`ContentHasher`] carrying a domain tag, so
//! equal bytes of different kinds never collide.

pub mod hasher;

pub use hasher::ContentHasher;
