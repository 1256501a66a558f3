use lattice_trie::NodeKey;
use serde::{Deserialize, Serialize};

use crate::api::{StorageReadView, StorageWriteBatch, METADATA};
use crate::error::StoreError;

/// Metadata key holding the scheme marker byte.
pub(crate) const SCHEME_MARKER: &[u8] = b"addressing_scheme";

/// How trie-node identities map to backing-store keys.
///
/// Fixed for the lifetime of a database instance; the choice is recorded in
/// the store on creation and validated on reopen. Mixing schemes within one
/// store is undefined, so a mismatch is a configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressingScheme {
    /// Content addressing: the 32-byte node hash. Deduplicating, and the only
    /// scheme supporting refcounted pruning with full retention guarantees.
    Hash,
    /// Position addressing: nibble count plus the packed path, one slot per
    /// trie position, overwritten in place on update.
    Path,
    /// Position/content mix: a 3-byte locality prefix (first six path
    /// nibbles) followed by bytes 3..32 of the node hash. Trades lookup
    /// locality against write amplification; not wire-compatible with `Path`.
    HalfPath,
}

impl AddressingScheme {
    /// Derives the backing-store key for a node. `prefix` namespaces storage
    /// tries by their owning account's hashed address and is empty for the
    /// account trie; content addressing ignores it (nodes dedup globally).
    pub fn node_db_key(&self, prefix: &[u8], key: &NodeKey) -> Vec<u8> {
        match self {
            AddressingScheme::Hash => key.hash.as_bytes().to_vec(),
            AddressingScheme::Path => {
                let nibbles = key.path.as_ref();
                let mut out = Vec::with_capacity(prefix.len() + 33);
                out.extend_from_slice(prefix);
                out.push(nibbles.len() as u8);
                out.extend_from_slice(&pack_nibbles(nibbles));
                out
            }
            AddressingScheme::HalfPath => {
                let nibbles = key.path.as_ref();
                let mut out = Vec::with_capacity(prefix.len() + 32);
                out.extend_from_slice(prefix);
                let packed = pack_nibbles(nibbles);
                out.extend_from_slice(&packed[..3]);
                out.extend_from_slice(&key.hash.as_bytes()[3..]);
                out
            }
        }
    }

    /// Position-addressed keys can hold different node versions over time, so
    /// reads must check the stored content against the expected hash.
    pub(crate) fn needs_hash_check(&self) -> bool {
        !matches!(self, AddressingScheme::Hash)
    }

    fn as_byte(self) -> u8 {
        match self {
            AddressingScheme::Hash => 0,
            AddressingScheme::Path => 1,
            AddressingScheme::HalfPath => 2,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(AddressingScheme::Hash),
            1 => Some(AddressingScheme::Path),
            2 => Some(AddressingScheme::HalfPath),
            _ => None,
        }
    }

    /// Validates this scheme against the marker recorded in the store,
    /// recording it on first open.
    pub(crate) fn check_marker(
        &self,
        view: &dyn StorageReadView,
        batch: &mut dyn StorageWriteBatch,
    ) -> Result<bool, StoreError> {
        match view.get(METADATA, SCHEME_MARKER)? {
            Some(marker) => {
                let stored = marker
                    .first()
                    .copied()
                    .and_then(Self::from_byte)
                    .ok_or_else(|| {
                        StoreError::CorruptedData("unknown addressing scheme marker".into())
                    })?;
                if stored != *self {
                    return Err(StoreError::AddressingSchemeMismatch {
                        stored,
                        requested: *self,
                    });
                }
                Ok(false)
            }
            None => {
                batch.put(METADATA, SCHEME_MARKER.to_vec(), vec![self.as_byte()])?;
                Ok(true)
            }
        }
    }
}

/// Packs up to 64 nibbles into 32 bytes, zero-padded on the right.
fn pack_nibbles(nibbles: &[u8]) -> [u8; 32] {
    let mut packed = [0u8; 32];
    for (i, nibble) in nibbles.iter().take(64).enumerate() {
        packed[i / 2] |= nibble << (4 * (1 - i % 2));
    }
    packed
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ethereum_types::H256;
    use lattice_trie::Nibbles;

    fn key(path: Vec<u8>, hash_byte: u8) -> NodeKey {
        NodeKey::new(Nibbles::from_hex(path), H256::repeat_byte(hash_byte))
    }

    #[test]
    fn hash_scheme_ignores_path_and_prefix() {
        let scheme = AddressingScheme::Hash;
        let a = scheme.node_db_key(b"prefix", &key(vec![1, 2], 0xaa));
        let b = scheme.node_db_key(&[], &key(vec![7], 0xaa));
        assert_eq!(a, b);
        assert_eq!(a, H256::repeat_byte(0xaa).as_bytes().to_vec());
    }

    #[test]
    fn path_scheme_is_prefix_free() {
        let scheme = AddressingScheme::Path;
        let a = scheme.node_db_key(&[], &key(vec![0xa], 0x00));
        let b = scheme.node_db_key(&[], &key(vec![0xa, 0x0], 0x00));
        assert_ne!(a, b);
        assert_eq!(a.len(), 33);
        assert_eq!(a[0], 1);
        assert_eq!(b[0], 2);
        assert_eq!(a[1], 0xa0);
    }

    #[test]
    fn half_path_mixes_locality_prefix_and_hash() {
        let scheme = AddressingScheme::HalfPath;
        let derived = scheme.node_db_key(&[], &key(vec![1, 2, 3, 4, 5, 6, 7], 0xcd));
        assert_eq!(derived.len(), 32);
        assert_eq!(&derived[..3], &[0x12, 0x34, 0x56]);
        assert_eq!(&derived[3..], &H256::repeat_byte(0xcd).as_bytes()[3..]);
    }

    #[test]
    fn storage_prefix_namespaces_position_schemes() {
        let scheme = AddressingScheme::Path;
        let bare = scheme.node_db_key(&[], &key(vec![1], 0x00));
        let prefixed = scheme.node_db_key(H256::repeat_byte(0x99).as_bytes(), &key(vec![1], 0x00));
        assert_eq!(prefixed.len(), bare.len() + 32);
        assert_eq!(&prefixed[32..], bare.as_slice());
    }
}
