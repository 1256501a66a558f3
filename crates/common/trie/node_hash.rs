use ethereum_types::H256;
use lattice_rlp::{constants::RLP_NULL, encode::RLPEncode};
use sha3::{Digest, Keccak256};

/// Reference to a trie node.
///
/// Nodes whose RLP encoding is at least 32 bytes long are referenced by their
/// Keccak-256 hash. Shorter nodes are inlined, their encoding is embedded
/// directly in the parent instead of being stored on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeHash {
    Hashed(H256),
    // (encoded node, encoded length)
    Inline(([u8; 31], u8)),
}

impl NodeHash {
    /// Invalid reference, used for empty branch slots.
    pub const EMPTY: NodeHash = NodeHash::Inline(([0; 31], 0));

    /// Returns the reference for a node given its RLP encoding.
    pub fn from_encoded_raw(encoded: &[u8]) -> NodeHash {
        if encoded.len() >= 32 {
            NodeHash::Hashed(keccak(encoded))
        } else {
            let mut buffer = [0; 31];
            buffer[..encoded.len()].copy_from_slice(encoded);
            NodeHash::Inline((buffer, encoded.len() as u8))
        }
    }

    /// Converts the reference into a definitive hash. Inline nodes get hashed,
    /// which is only correct for a trie root (anywhere else they stay inlined).
    pub fn finalize(self) -> H256 {
        match self {
            NodeHash::Hashed(hash) => hash,
            NodeHash::Inline((encoded, len)) if len > 0 => keccak(&encoded[..len as usize]),
            NodeHash::Inline(_) => *crate::EMPTY_TRIE_HASH,
        }
    }

    /// Returns true if the reference points to an actual node.
    pub fn is_valid(&self) -> bool {
        !matches!(self, NodeHash::Inline((_, 0)))
    }
}

impl Default for NodeHash {
    fn default() -> Self {
        NodeHash::EMPTY
    }
}

impl From<H256> for NodeHash {
    fn from(hash: H256) -> Self {
        NodeHash::Hashed(hash)
    }
}

impl RLPEncode for NodeHash {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        match self {
            NodeHash::Hashed(hash) => hash.encode(buf),
            // inlined encodings are already valid RLP items
            NodeHash::Inline((encoded, len)) if *len > 0 => {
                buf.put_slice(&encoded[..*len as usize])
            }
            NodeHash::Inline(_) => buf.put_u8(RLP_NULL),
        }
    }
}

pub(crate) fn keccak(data: impl AsRef<[u8]>) -> H256 {
    H256(Keccak256::new_with_prefix(data).finalize().into())
}
