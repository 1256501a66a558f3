mod db;
mod error;
mod nibbles;
mod node;
mod node_hash;
mod node_key;
mod rlp;
mod state;

use ethereum_types::H256;
use lattice_rlp::constants::RLP_NULL;
use lazy_static::lazy_static;

pub use self::db::{InMemoryTrieDB, TrieDB};
pub use self::error::TrieError;
pub use self::nibbles::Nibbles;
pub use self::node::{BranchNode, ExtensionNode, LeafNode, Node};
pub use self::node_hash::NodeHash;
pub use self::node_key::NodeKey;
pub use self::state::TrieState;

use self::node_hash::keccak;

/// RLP-encoded trie path
pub type PathRLP = Vec<u8>;
/// RLP-encoded trie value
pub type ValueRLP = Vec<u8>;
/// RLP-encoded trie node
pub type NodeRLP = Vec<u8>;

lazy_static! {
    /// Hash of an empty trie: keccak(RLP of the empty string).
    pub static ref EMPTY_TRIE_HASH: H256 = keccak([RLP_NULL]);
}

/// Merkle Patricia Trie over an abstract node store.
///
/// Mutations accumulate in an in-memory dirty cache and only reach the backing
/// store on [`commit`](Trie::commit). Two tries holding the same key-value
/// mapping always produce the same root hash, regardless of the order the
/// mapping was built in.
pub struct Trie {
    root: Option<NodeHash>,
    pub(crate) state: TrieState,
}

impl Trie {
    /// Creates a new empty trie on top of the given store.
    pub fn new(db: Box<dyn TrieDB>) -> Trie {
        Trie {
            root: None,
            state: TrieState::new(db),
        }
    }

    /// Opens a trie at a previously committed root.
    pub fn open(db: Box<dyn TrieDB>, root: H256) -> Trie {
        let root = (root != *EMPTY_TRIE_HASH).then_some(NodeHash::from(root));
        Trie {
            root,
            state: TrieState::new(db),
        }
    }

    /// Creates a new empty trie backed by its own in-memory store.
    pub fn new_temp() -> Trie {
        Trie::new(Box::new(InMemoryTrieDB::new_empty()))
    }

    /// Retrieves the value stored under the given path.
    pub fn get(&self, path: &PathRLP) -> Result<Option<ValueRLP>, TrieError> {
        let Some(root) = self.root else {
            return Ok(None);
        };
        let path = Nibbles::from_bytes(path);
        let root_node = self
            .state
            .get_node(root, &path)?
            .ok_or(TrieError::InconsistentTree)?;
        root_node.get(&self.state, path)
    }

    /// Inserts a value under the given path, overwriting any previous value.
    pub fn insert(&mut self, path: PathRLP, value: ValueRLP) -> Result<(), TrieError> {
        let path = Nibbles::from_bytes(&path);
        let root_node = match self.root {
            Some(root) => {
                let root_node = self
                    .state
                    .get_node(root, &path)?
                    .ok_or(TrieError::InconsistentTree)?;
                root_node.insert(&mut self.state, path, value)?
            }
            None => LeafNode::new(path, value).into(),
        };
        self.root = Some(root_node.insert_self(&mut self.state)?);
        Ok(())
    }

    /// Removes the value stored under the given path and returns it.
    /// The resulting trie is structurally identical to one that never held
    /// the removed key.
    pub fn remove(&mut self, path: &PathRLP) -> Result<Option<ValueRLP>, TrieError> {
        let Some(root) = self.root else {
            return Ok(None);
        };
        let path = Nibbles::from_bytes(path);
        let root_node = self
            .state
            .get_node(root, &path)?
            .ok_or(TrieError::InconsistentTree)?;
        let (root_node, old_value) = root_node.remove(&mut self.state, path)?;
        self.root = root_node
            .map(|node| node.insert_self(&mut self.state))
            .transpose()?;
        Ok(old_value)
    }

    /// Commits all pending changes and returns the root hash.
    pub fn hash(&mut self) -> Result<H256, TrieError> {
        self.commit()?;
        Ok(self.hash_no_commit())
    }

    /// Returns the current root hash without committing.
    pub fn hash_no_commit(&self) -> H256 {
        self.root
            .map(NodeHash::finalize)
            .unwrap_or(*EMPTY_TRIE_HASH)
    }

    /// Flushes all dirty nodes reachable from the current root to the store.
    pub fn commit(&mut self) -> Result<(), TrieError> {
        if let Some(root) = self.root {
            self.state.commit(root)?;
        }
        Ok(())
    }

    /// Drains the dirty nodes reachable from the current root as a write
    /// batch, parents before children, without touching the store.
    pub fn collect_commit(&mut self) -> Result<Vec<(NodeKey, NodeRLP)>, TrieError> {
        match self.root {
            Some(root) => self.state.collect_commit(root),
            None => Ok(Vec::new()),
        }
    }

    /// Encoded size of the pending (uncommitted) nodes.
    pub fn cache_size_bytes(&self) -> usize {
        self.state.cache_size_bytes()
    }

    /// Discards all pending changes, leaving the trie at its last committed
    /// root. The root reference itself is not rolled back; reopen the trie at
    /// the wanted root to fully reset it.
    pub fn clear_cache(&mut self) {
        self.state.clear_cache();
    }

    pub fn state(&self) -> &TrieState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut TrieState {
        &mut self.state
    }
}
