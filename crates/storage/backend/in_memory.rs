use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::api::{StorageBackend, StorageReadView, StorageWriteBatch, TableName, TABLES};
use crate::error::StoreError;

type Tables = HashMap<TableName, BTreeMap<Vec<u8>, Vec<u8>>>;

/// Default backend: sorted in-memory tables behind a read/write lock.
/// Write batches buffer their operations and apply them atomically under a
/// single write-lock acquisition on commit.
#[derive(Clone)]
pub struct InMemoryBackend {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        let mut tables = Tables::default();
        for table in TABLES {
            tables.insert(table, BTreeMap::new());
        }
        InMemoryBackend {
            tables: Arc::new(RwLock::new(tables)),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for InMemoryBackend {
    fn begin_read(&self) -> Result<Box<dyn StorageReadView>, StoreError> {
        Ok(Box::new(InMemoryReadView {
            tables: self.tables.clone(),
        }))
    }

    fn begin_write(&self) -> Result<Box<dyn StorageWriteBatch>, StoreError> {
        Ok(Box::new(InMemoryWriteBatch {
            tables: self.tables.clone(),
            ops: Vec::new(),
        }))
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

struct InMemoryReadView {
    tables: Arc<RwLock<Tables>>,
}

impl StorageReadView for InMemoryReadView {
    fn get(&self, table: TableName, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::LockError)?;
        Ok(tables
            .get(table)
            .ok_or(StoreError::MissingTable(table))?
            .get(key)
            .cloned())
    }
}

enum BatchOp {
    Put(TableName, Vec<u8>, Vec<u8>),
    Delete(TableName, Vec<u8>),
}

struct InMemoryWriteBatch {
    tables: Arc<RwLock<Tables>>,
    ops: Vec<BatchOp>,
}

impl StorageWriteBatch for InMemoryWriteBatch {
    fn put(&mut self, table: TableName, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError> {
        self.ops.push(BatchOp::Put(table, key, value));
        Ok(())
    }

    fn delete(&mut self, table: TableName, key: Vec<u8>) -> Result<(), StoreError> {
        self.ops.push(BatchOp::Delete(table, key));
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(|_| StoreError::LockError)?;
        for op in self.ops {
            match op {
                BatchOp::Put(table, key, value) => {
                    tables
                        .get_mut(table)
                        .ok_or(StoreError::MissingTable(table))?
                        .insert(key, value);
                }
                BatchOp::Delete(table, key) => {
                    tables
                        .get_mut(table)
                        .ok_or(StoreError::MissingTable(table))?
                        .remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::{METADATA, TRIE_NODES};

    #[test]
    fn batch_is_invisible_until_commit() {
        let backend = InMemoryBackend::new();
        let mut batch = backend.begin_write().unwrap();
        batch.put(TRIE_NODES, b"k".to_vec(), b"v".to_vec()).unwrap();

        let view = backend.begin_read().unwrap();
        assert_eq!(view.get(TRIE_NODES, b"k").unwrap(), None);

        batch.commit().unwrap();
        let view = backend.begin_read().unwrap();
        assert_eq!(view.get(TRIE_NODES, b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn tables_are_disjoint() {
        let backend = InMemoryBackend::new();
        let mut batch = backend.begin_write().unwrap();
        batch.put(TRIE_NODES, b"k".to_vec(), b"1".to_vec()).unwrap();
        batch.put(METADATA, b"k".to_vec(), b"2".to_vec()).unwrap();
        batch.commit().unwrap();

        let view = backend.begin_read().unwrap();
        assert_eq!(view.get(TRIE_NODES, b"k").unwrap(), Some(b"1".to_vec()));
        assert_eq!(view.get(METADATA, b"k").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn delete_in_same_batch_wins_over_put() {
        let backend = InMemoryBackend::new();
        let mut batch = backend.begin_write().unwrap();
        batch.put(TRIE_NODES, b"k".to_vec(), b"v".to_vec()).unwrap();
        batch.delete(TRIE_NODES, b"k".to_vec()).unwrap();
        batch.commit().unwrap();

        let view = backend.begin_read().unwrap();
        assert_eq!(view.get(TRIE_NODES, b"k").unwrap(), None);
    }
}
