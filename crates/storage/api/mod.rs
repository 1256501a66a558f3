//! Narrow backing-store interface.
//!
//! The store only needs a sorted byte-string keyspace split into a handful of
//! named tables, point reads, atomic write batches, and an explicit flush.
//! Everything engine-specific (WAL tuning, compaction, compression) is
//! forwarded through [`BackendOptions`](crate::BackendOptions) untouched.

use crate::error::StoreError;

pub type TableName = &'static str;

/// Trie nodes of the account trie and all storage tries, keyed per the
/// configured addressing scheme.
pub const TRIE_NODES: TableName = "trie_nodes";
/// Per-node reference counts (hash addressing only), big-endian u64.
pub const NODE_REFCOUNTS: TableName = "node_refcounts";
/// Contract code keyed by code hash.
pub const ACCOUNT_CODES: TableName = "account_codes";
/// Minimal block headers keyed by big-endian sequence number.
pub const HEADERS: TableName = "headers";
/// Store-wide metadata (addressing scheme marker).
pub const METADATA: TableName = "metadata";

pub const TABLES: [TableName; 5] = [TRIE_NODES, NODE_REFCOUNTS, ACCOUNT_CODES, HEADERS, METADATA];

pub trait StorageBackend: Send + Sync {
    /// Opens a read view. Reads taken from one view are consistent with each
    /// other for engines that support snapshots; at minimum they never observe
    /// a half-applied write batch.
    fn begin_read(&self) -> Result<Box<dyn StorageReadView>, StoreError>;

    /// Opens a write batch. Nothing is visible until `commit`, which applies
    /// the whole batch atomically.
    fn begin_write(&self) -> Result<Box<dyn StorageWriteBatch>, StoreError>;

    /// Forces buffered writes down to durable storage.
    fn flush(&self) -> Result<(), StoreError>;
}

pub trait StorageReadView: Send {
    fn get(&self, table: TableName, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
}

pub trait StorageWriteBatch: Send {
    fn put(&mut self, table: TableName, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError>;
    fn delete(&mut self, table: TableName, key: Vec<u8>) -> Result<(), StoreError>;
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
