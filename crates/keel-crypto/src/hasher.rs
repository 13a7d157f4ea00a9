use keel_types::Hash;

/// BLAKE3 hasher bound to a domain tag.
///
/// The tag and a `:` separator are fed to BLAKE3 ahead of the data, so the
/// same bytes hashed as a trie node and as a state record never share an
/// address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Addresses of encoded trie nodes.
    pub const TRIE_NODE: Self = Self::new("keel-trie-node-v1");
    /// Maps trie keys of any length to a fixed 32-byte path.
    pub const TRIE_KEY: Self = Self::new("keel-trie-key-v1");
    /// Identifiers of store state records.
    pub const STATE: Self = Self::new("keel-state-v1");

    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    pub fn hash(&self, data: &[u8]) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        Hash::from_raw(*hasher.finalize().as_bytes())
    }

    /// Returns `true` if `data` hashes to `expected` in this domain.
    pub fn verify(&self, data: &[u8], expected: &Hash) -> bool {
        self.hash(data) == *expected
    }

    pub fn domain(&self) -> &'static str {
        self.domain
    }
}
