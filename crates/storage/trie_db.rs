use std::sync::Arc;

use lattice_trie::{NodeKey, TrieDB, TrieError};

use crate::account::keccak;
use crate::api::{StorageBackend, TRIE_NODES};
use crate::error::StoreError;
use crate::keys::AddressingScheme;
use crate::pruning::SharedBuffer;

/// Bridges a trie onto the store: reads consult the unflushed node buffer
/// first, then the backend; keys are derived per the addressing scheme.
///
/// Position-addressed slots get overwritten as the trie evolves, so every
/// read is checked against the expected node hash; a stale version in a slot
/// reads as missing rather than as wrong data.
pub(crate) struct TrieDbAdapter {
    backend: Arc<dyn StorageBackend>,
    buffer: SharedBuffer,
    scheme: AddressingScheme,
    /// Hashed account address for storage tries, empty for the account trie.
    prefix: Vec<u8>,
}

impl TrieDbAdapter {
    pub(crate) fn new(
        backend: Arc<dyn StorageBackend>,
        buffer: SharedBuffer,
        scheme: AddressingScheme,
        prefix: Vec<u8>,
    ) -> Self {
        TrieDbAdapter {
            backend,
            buffer,
            scheme,
            prefix,
        }
    }
}

fn db_err(err: StoreError) -> TrieError {
    TrieError::DbError(err.into())
}

impl TrieDB for TrieDbAdapter {
    fn get(&self, key: &NodeKey) -> Result<Option<Vec<u8>>, TrieError> {
        let db_key = self.scheme.node_db_key(&self.prefix, key);
        let verify = self.scheme.needs_hash_check();

        if let Some(node) = self
            .buffer
            .get_node(&db_key, &key.hash, verify)
            .map_err(db_err)?
        {
            return Ok(Some(node));
        }

        let view = self.backend.begin_read().map_err(db_err)?;
        match view.get(TRIE_NODES, &db_key).map_err(db_err)? {
            Some(node) if !verify || keccak(&node) == key.hash => Ok(Some(node)),
            _ => Ok(None),
        }
    }

    // World-state commits route node batches through the commit manager; this
    // direct path serves standalone tries opened on the store.
    fn put_batch(&self, key_values: Vec<(NodeKey, Vec<u8>)>) -> Result<(), TrieError> {
        let mut batch = self.backend.begin_write().map_err(db_err)?;
        for (key, value) in key_values {
            let db_key = self.scheme.node_db_key(&self.prefix, &key);
            batch.put(TRIE_NODES, db_key, value).map_err(db_err)?;
        }
        batch.commit().map_err(db_err)
    }
}
