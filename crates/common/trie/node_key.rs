use ethereum_types::H256;

use crate::nibbles::Nibbles;

/// Location of a persisted node.
///
/// Carries both the node's absolute path from the trie root and its hash, so a
/// backing store can key nodes by either (or by a mix of both) without the trie
/// having to know which layout is in use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub path: Nibbles,
    pub hash: H256,
}

impl NodeKey {
    pub fn new(path: Nibbles, hash: H256) -> Self {
        Self { path, hash }
    }

    /// Packs the key into a fixed-size array: 32 bytes of packed path nibbles,
    /// one nibble-count byte, then the 32 hash bytes. Paths are at most 64
    /// nibbles, the count byte disambiguates odd-length paths.
    pub fn to_fixed_size(&self) -> [u8; 65] {
        let mut buffer = [0u8; 65];
        let path = self.path.as_ref();
        debug_assert!(path.len() <= 64);
        for (i, nibble) in path.iter().enumerate() {
            buffer[i / 2] |= nibble << (4 * (1 - i % 2));
        }
        buffer[32] = path.len() as u8;
        buffer[33..].copy_from_slice(self.hash.as_bytes());
        buffer
    }
}
