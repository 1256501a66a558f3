use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use lattice_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};
use lattice_trie::EMPTY_TRIE_HASH;
use lazy_static::lazy_static;
use sha3::{Digest, Keccak256};

lazy_static! {
    /// Hash of empty code: keccak("").
    pub static ref EMPTY_CODE_HASH: H256 = keccak(Bytes::new());
}

pub fn keccak(data: impl AsRef<[u8]>) -> H256 {
    H256(Keccak256::new_with_prefix(data).finalize().into())
}

/// Account trie key for an address.
pub fn hash_address(address: &Address) -> H256 {
    keccak(address.as_bytes())
}

/// Storage trie key for a slot.
pub fn hash_slot(slot: &U256) -> H256 {
    keccak(slot.to_big_endian())
}

/// Account record stored in the account trie, canonical Ethereum encoding:
/// `[nonce, balance, storage_root, code_hash]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountState {
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: H256,
    pub code_hash: H256,
}

impl Default for AccountState {
    fn default() -> Self {
        AccountState {
            nonce: 0,
            balance: U256::zero(),
            storage_root: *EMPTY_TRIE_HASH,
            code_hash: *EMPTY_CODE_HASH,
        }
    }
}

impl AccountState {
    /// True when the account qualifies for removal from the account trie:
    /// zero nonce, zero balance, no code. Removal is eager at commit time,
    /// not a lazy cleanup.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code_hash == *EMPTY_CODE_HASH
    }
}

impl RLPEncode for AccountState {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.nonce)
            .encode_field(&self.balance)
            .encode_field(&self.storage_root)
            .encode_field(&self.code_hash)
            .finish();
    }
}

impl RLPDecode for AccountState {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (nonce, decoder) = decoder.decode_field("nonce")?;
        let (balance, decoder) = decoder.decode_field("balance")?;
        let (storage_root, decoder) = decoder.decode_field("storage_root")?;
        let (code_hash, decoder) = decoder.decode_field("code_hash")?;
        Ok((
            AccountState {
                nonce,
                balance,
                storage_root,
                code_hash,
            },
            decoder.finish()?,
        ))
    }
}

/// Minimal header anchoring a committed root; full block semantics are out
/// of scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub state_root: H256,
    pub parent_hash: H256,
}

impl BlockHeader {
    pub fn genesis() -> Self {
        BlockHeader {
            number: 0,
            state_root: *EMPTY_TRIE_HASH,
            parent_hash: H256::zero(),
        }
    }

    pub fn new(number: u64, state_root: H256, parent_hash: H256) -> Self {
        BlockHeader {
            number,
            state_root,
            parent_hash,
        }
    }

    pub fn hash(&self) -> H256 {
        keccak(self.encode_to_vec())
    }
}

impl RLPEncode for BlockHeader {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.number)
            .encode_field(&self.state_root)
            .encode_field(&self.parent_hash)
            .finish();
    }
}

impl RLPDecode for BlockHeader {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (number, decoder) = decoder.decode_field("number")?;
        let (state_root, decoder) = decoder.decode_field("state_root")?;
        let (parent_hash, decoder) = decoder.decode_field("parent_hash")?;
        Ok((
            BlockHeader {
                number,
                state_root,
                parent_hash,
            },
            decoder.finish()?,
        ))
    }
}

/// Protocol-version dependent commit rules, supplied by the caller.
#[derive(Debug, Clone, Copy)]
pub struct CommitSpec {
    /// Remove accounts that end the commit with zero nonce, zero balance and
    /// no code (EIP-161 style cleanup).
    pub remove_empty_accounts: bool,
}

impl Default for CommitSpec {
    fn default() -> Self {
        CommitSpec {
            remove_empty_accounts: true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn empty_code_hash_matches_known_value() {
        assert_eq!(
            *EMPTY_CODE_HASH,
            H256(hex!(
                "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
            ))
        );
    }

    #[test]
    fn account_state_roundtrip() {
        let account = AccountState {
            nonce: 7,
            balance: U256::from(1_000_000u64),
            storage_root: H256::repeat_byte(0xaa),
            code_hash: H256::repeat_byte(0xbb),
        };
        let encoded = account.encode_to_vec();
        assert_eq!(AccountState::decode(&encoded).unwrap(), account);
    }

    #[test]
    fn default_account_is_empty() {
        assert!(AccountState::default().is_empty());
        let mut account = AccountState::default();
        account.balance = U256::one();
        assert!(!account.is_empty());
        // storage does not keep an account alive
        let mut account = AccountState::default();
        account.storage_root = H256::repeat_byte(0x01);
        assert!(account.is_empty());
    }

    #[test]
    fn header_roundtrip() {
        let header = BlockHeader::new(42, H256::repeat_byte(0x11), H256::repeat_byte(0x22));
        let encoded = header.encode_to_vec();
        assert_eq!(BlockHeader::decode(&encoded).unwrap(), header);
    }
}
