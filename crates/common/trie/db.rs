use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::TrieError;
use crate::node_key::NodeKey;

/// Backing store for trie nodes.
///
/// Keys carry both path and hash, so implementations are free to index nodes
/// however they like (by hash, by path, or a combination).
pub trait TrieDB: Send + Sync {
    fn get(&self, key: &NodeKey) -> Result<Option<Vec<u8>>, TrieError>;
    fn put_batch(&self, key_values: Vec<(NodeKey, Vec<u8>)>) -> Result<(), TrieError>;
    fn put(&self, key: NodeKey, value: Vec<u8>) -> Result<(), TrieError> {
        self.put_batch(vec![(key, value)])
    }
}

/// InMemory implementation for the TrieDB trait, with get and put operations.
#[derive(Default, Clone)]
pub struct InMemoryTrieDB {
    inner: Arc<Mutex<BTreeMap<[u8; 65], Vec<u8>>>>,
}

impl InMemoryTrieDB {
    pub fn new(map: Arc<Mutex<BTreeMap<[u8; 65], Vec<u8>>>>) -> InMemoryTrieDB {
        InMemoryTrieDB { inner: map }
    }

    pub fn new_empty() -> InMemoryTrieDB {
        Self::default()
    }
}

impl TrieDB for InMemoryTrieDB {
    fn get(&self, key: &NodeKey) -> Result<Option<Vec<u8>>, TrieError> {
        Ok(self
            .inner
            .lock()
            .map_err(|_| TrieError::LockError)?
            .get(&key.to_fixed_size())
            .cloned())
    }

    fn put_batch(&self, key_values: Vec<(NodeKey, Vec<u8>)>) -> Result<(), TrieError> {
        let mut db = self.inner.lock().map_err(|_| TrieError::LockError)?;
        for (key, value) in key_values {
            db.insert(key.to_fixed_size(), value);
        }
        Ok(())
    }
}
