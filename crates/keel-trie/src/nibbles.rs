use serde::{Deserialize, Serialize};

/// Nibble path for trie traversal.
///
/// Keys are hashed to 32 bytes and then split into half-bytes (0-15), giving
/// every key a path of exactly 64 nibbles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nibbles(Vec<u8>);

impl Nibbles {
    /// Split bytes into nibbles, high half first.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut nibbles = Vec::with_capacity(bytes.len() * 2);
        for byte in bytes {
            nibbles.push(byte >> 4);
            nibbles.push(byte & 0x0F);
        }
        Nibbles(nibbles)
    }

    /// Copy an existing nibble slice.
    pub fn from_slice(nibbles: &[u8]) -> Self {
        Nibbles(nibbles.to_vec())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Nibble at `index`.
    pub fn at(&self, index: usize) -> u8 {
        self.0[index]
    }

    /// Length of the prefix shared with `other`.
    pub fn common_prefix_len(&self, other: &[u8]) -> usize {
        common_prefix_len(&self.0, other)
    }
}

/// Length of the prefix shared by two nibble slices.
pub fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}
