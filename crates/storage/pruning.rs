//! Commit/pruning manager.
//!
//! Each `commit_tree` hands the manager a sequence-tagged batch of freshly
//! created nodes. Batches move through `Pending` (buffered in memory) ->
//! `Flushed` (written to the backend) -> `Prunable` (root out of the
//! retention window) -> `Deleted`, with the mode deciding how eagerly each
//! transition happens.
//!
//! Under hash addressing, reachability is tracked with persisted per-node
//! reference counts: flushing a batch increments every child link of every
//! written node and pins the batch root; a root leaving the retention window
//! is unpinned and nodes cascade-delete at count zero. Refcount updates ride
//! in the same atomic write batch as the node writes, so a crash never
//! leaves counts and nodes disagreeing.
//!
//! Position-addressed schemes (`Path`, `HalfPath`) overwrite slots in place,
//! so superseded versions vanish at flush time; historical roots stay
//! readable only while their node versions remain in the unflushed buffer.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use ethereum_types::H256;
use lattice_rlp::decode::RLPDecode;
use lattice_rlp::encode::RLPEncode;
use lattice_trie::{Nibbles, Node, NodeHash, NodeKey, EMPTY_TRIE_HASH};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::account::{keccak, AccountState, BlockHeader};
use crate::api::{
    StorageBackend, StorageReadView, StorageWriteBatch, ACCOUNT_CODES, HEADERS, NODE_REFCOUNTS,
    TRIE_NODES,
};
use crate::config::{PruningConfig, PruningMode};
use crate::error::StoreError;
use crate::keys::AddressingScheme;

/// One commit's worth of new nodes, keyed by derived db key.
pub(crate) struct SequenceBatch {
    pub header: BlockHeader,
    pub nodes: HashMap<Vec<u8>, Vec<u8>>,
    pub bytes: usize,
}

impl SequenceBatch {
    pub(crate) fn new(header: BlockHeader, nodes: HashMap<Vec<u8>, Vec<u8>>) -> Self {
        let bytes = nodes.iter().map(|(k, v)| k.len() + v.len()).sum();
        SequenceBatch {
            header,
            nodes,
            bytes,
        }
    }
}

#[derive(Default)]
struct BufferInner {
    /// Unflushed batches, oldest first.
    batches: VecDeque<SequenceBatch>,
    /// Flattened out-of-window batches (Memory mode keeps everything here).
    base: HashMap<Vec<u8>, Vec<u8>>,
    batch_bytes: usize,
    base_bytes: usize,
}

/// Unflushed node storage shared between the manager and every trie adapter,
/// so concurrent readers of retained roots see nodes that have not reached
/// the backend yet.
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer {
    inner: Arc<RwLock<BufferInner>>,
}

impl SharedBuffer {
    /// Looks a node up across buffered batches, newest first. With `verify`
    /// set, entries whose content does not hash to `expected` are skipped:
    /// under position addressing an older batch may still hold the version a
    /// historical root needs.
    pub(crate) fn get_node(
        &self,
        db_key: &[u8],
        expected: &H256,
        verify: bool,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::LockError)?;
        for batch in inner.batches.iter().rev() {
            if let Some(node) = batch.nodes.get(db_key) {
                if !verify || keccak(node) == *expected {
                    return Ok(Some(node.clone()));
                }
            }
        }
        if let Some(node) = inner.base.get(db_key) {
            if !verify || keccak(node) == *expected {
                return Ok(Some(node.clone()));
            }
        }
        Ok(None)
    }

    fn push(&self, batch: SequenceBatch) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockError)?;
        inner.batch_bytes += batch.bytes;
        inner.batches.push_back(batch);
        Ok(())
    }

    fn drain(&self) -> Result<Vec<SequenceBatch>, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockError)?;
        inner.batch_bytes = 0;
        Ok(inner.batches.drain(..).collect())
    }

    fn total_bytes(&self) -> Result<usize, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::LockError)?;
        Ok(inner.batch_bytes + inner.base_bytes)
    }

    fn oldest_sequence(&self) -> Result<Option<u64>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::LockError)?;
        Ok(inner.batches.front().map(|batch| batch.header.number))
    }

    /// Merges the oldest batch into the base map (Memory mode eviction).
    /// Superseded position-addressed slots are reclaimed; content-addressed
    /// entries accumulate since older roots may still reference them.
    fn flatten_oldest(&self) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::LockError)?;
        let Some(batch) = inner.batches.pop_front() else {
            return Ok(false);
        };
        inner.batch_bytes = inner.batch_bytes.saturating_sub(batch.bytes);
        for (key, value) in batch.nodes {
            inner.base_bytes += key.len() + value.len();
            if let Some(old) = inner.base.insert(key, value) {
                inner.base_bytes = inner.base_bytes.saturating_sub(old.len());
            }
        }
        Ok(true)
    }
}

struct ManagerState {
    latest_sequence: Option<u64>,
    commits_since_flush: u64,
    /// Flushed roots awaiting their exit from the retention window, oldest
    /// first. Only populated under hash addressing; other schemes have
    /// nothing to delete.
    flushed: VecDeque<(u64, H256)>,
    headers: FxHashMap<u64, BlockHeader>,
}

pub(crate) struct CommitManager {
    backend: Arc<dyn StorageBackend>,
    scheme: AddressingScheme,
    config: PruningConfig,
    buffer: SharedBuffer,
    state: Mutex<ManagerState>,
}

impl CommitManager {
    pub(crate) fn new(
        backend: Arc<dyn StorageBackend>,
        scheme: AddressingScheme,
        config: PruningConfig,
        buffer: SharedBuffer,
    ) -> Self {
        CommitManager {
            backend,
            scheme,
            config,
            buffer,
            state: Mutex::new(ManagerState {
                latest_sequence: None,
                commits_since_flush: 0,
                flushed: VecDeque::new(),
                headers: FxHashMap::default(),
            }),
        }
    }

    /// Records a committed sequence: its header, its new nodes, and any new
    /// contract code. Codes are content-addressed and written through
    /// immediately in every mode; node handling follows the pruning mode.
    pub(crate) fn record(
        &self,
        header: BlockHeader,
        nodes: HashMap<Vec<u8>, Vec<u8>>,
        codes: Vec<(H256, Bytes)>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| StoreError::LockError)?;
        let sequence = header.number;
        trace!(sequence, node_count = nodes.len(), "recording commit");

        if !codes.is_empty() {
            let mut batch = self.backend.begin_write()?;
            for (hash, code) in codes {
                batch.put(ACCOUNT_CODES, hash.as_bytes().to_vec(), code.to_vec())?;
            }
            batch.commit()?;
        }

        state.headers.insert(sequence, header.clone());
        state.latest_sequence = Some(sequence);

        match self.config.mode {
            PruningMode::None => {
                // archive: synchronous flush, no retention bookkeeping
                self.buffer.push(SequenceBatch::new(header, nodes))?;
                self.flush_buffered(&mut state)?;
                self.backend.flush()?;
            }
            PruningMode::Hybrid => {
                self.buffer.push(SequenceBatch::new(header, nodes))?;
                state.commits_since_flush += 1;
                let over_budget = self.buffer.total_bytes()? > self.config.max_dirty_bytes;
                let over_interval = state.commits_since_flush >= self.config.persistence_interval;
                let over_boundary = self.config.pruning_boundary > 0
                    && self
                        .buffer
                        .oldest_sequence()?
                        .is_some_and(|oldest| sequence - oldest >= self.config.pruning_boundary);
                if over_budget || over_interval || over_boundary {
                    self.flush_buffered(&mut state)?;
                }
                self.prune(&mut state)?;
            }
            PruningMode::Memory => {
                self.buffer.push(SequenceBatch::new(header, nodes))?;
                // evict out-of-window batches once over budget; their headers
                // go with them, nothing persists them in this mode
                while self.buffer.total_bytes()? > self.config.max_dirty_bytes {
                    let Some(oldest) = self.buffer.oldest_sequence()? else {
                        break;
                    };
                    if sequence - oldest < self.config.retention_window {
                        break;
                    }
                    self.buffer.flatten_oldest()?;
                    state.headers.remove(&oldest);
                }
            }
        }
        Ok(())
    }

    /// Forces the dirty cache down regardless of boundary. Blocking; once a
    /// node write has started it is not interrupted.
    pub(crate) fn flush_cache(&self) -> Result<(), StoreError> {
        match self.config.mode {
            PruningMode::Memory => {
                while self.buffer.flatten_oldest()? {}
                Ok(())
            }
            _ => {
                let mut state = self.state.lock().map_err(|_| StoreError::LockError)?;
                self.flush_buffered(&mut state)?;
                self.backend.flush()
            }
        }
    }

    /// True if a trie anchored at `root` can be fully resolved right now.
    pub(crate) fn is_resolvable(&self, root: H256) -> Result<bool, StoreError> {
        if root == *EMPTY_TRIE_HASH {
            return Ok(true);
        }
        let key = self
            .scheme
            .node_db_key(&[], &NodeKey::new(Nibbles::default(), root));
        let verify = self.scheme.needs_hash_check();
        if self.buffer.get_node(&key, &root, verify)?.is_some() {
            return Ok(true);
        }
        let view = self.backend.begin_read()?;
        Ok(matches!(
            view.get(TRIE_NODES, &key)?,
            Some(node) if !verify || keccak(&node) == root
        ))
    }

    /// Header for a recorded sequence, falling back to the persisted table
    /// once pruned from memory. In Memory mode headers of evicted sequences
    /// are gone for good, the backend never sees them.
    pub(crate) fn get_header(&self, sequence: u64) -> Result<Option<BlockHeader>, StoreError> {
        let state = self.state.lock().map_err(|_| StoreError::LockError)?;
        if let Some(header) = state.headers.get(&sequence) {
            return Ok(Some(header.clone()));
        }
        drop(state);
        let view = self.backend.begin_read()?;
        view.get(HEADERS, &sequence.to_be_bytes())?
            .map(|rlp| BlockHeader::decode(&rlp).map_err(StoreError::from))
            .transpose()
    }

    /// Writes all buffered batches to the backend in one atomic write batch,
    /// refcount updates included.
    fn flush_buffered(&self, state: &mut ManagerState) -> Result<(), StoreError> {
        let batches = self.buffer.drain()?;
        if batches.is_empty() {
            state.commits_since_flush = 0;
            return Ok(());
        }

        let view = self.backend.begin_read()?;
        let mut write = self.backend.begin_write()?;
        let mut refcounts: HashMap<Vec<u8>, u64> = HashMap::new();
        let mut written: HashSet<Vec<u8>> = HashSet::new();
        let mut node_count = 0usize;
        let mut byte_count = 0usize;

        for batch in &batches {
            node_count += batch.nodes.len();
            byte_count += batch.bytes;
            for (key, rlp) in &batch.nodes {
                write.put(TRIE_NODES, key.clone(), rlp.clone())?;
            }
            write.put(
                HEADERS,
                batch.header.number.to_be_bytes().to_vec(),
                batch.header.encode_to_vec(),
            )?;
            // archive mode never deletes, so it skips reachability tracking
            let track_reachability = self.scheme == AddressingScheme::Hash
                && self.config.mode == PruningMode::Hybrid;
            if track_reachability {
                for (key, rlp) in &batch.nodes {
                    // make sure the node has a count entry even if nothing
                    // references it yet within this flush
                    load_refcount(view.as_ref(), &mut refcounts, key)?;
                    // a node re-emitted later (a subtree reverting to an
                    // earlier shape) maps to the same entry and already holds
                    // counts on its children; counting again would strand them
                    let already_stored = written.contains(key)
                        || view.get(TRIE_NODES, key)?.is_some();
                    written.insert(key.clone());
                    if already_stored {
                        continue;
                    }
                    for child in node_children(rlp)? {
                        let count = load_refcount(view.as_ref(), &mut refcounts, &child)?;
                        refcounts.insert(child, count + 1);
                    }
                }
                // pin the root for as long as its sequence stays retained
                let root_key = batch.header.state_root.as_bytes().to_vec();
                let count = load_refcount(view.as_ref(), &mut refcounts, &root_key)?;
                refcounts.insert(root_key, count + 1);
                state
                    .flushed
                    .push_back((batch.header.number, batch.header.state_root));
            }
        }

        for (key, count) in refcounts {
            write.put(NODE_REFCOUNTS, key, count.to_be_bytes().to_vec())?;
        }
        write.commit()?;
        // persisted now, lookups fall back to the table
        for batch in &batches {
            state.headers.remove(&batch.header.number);
        }
        state.commits_since_flush = 0;
        debug!(
            batches = batches.len(),
            nodes = node_count,
            bytes = byte_count,
            "flushed dirty cache"
        );
        Ok(())
    }

    /// Unpins flushed roots that fell out of the retention window and deletes
    /// everything that became unreachable.
    fn prune(&self, state: &mut ManagerState) -> Result<(), StoreError> {
        let Some(latest) = state.latest_sequence else {
            return Ok(());
        };
        while let Some(&(sequence, root)) = state.flushed.front() {
            if latest.saturating_sub(sequence) < self.config.retention_window {
                break;
            }
            state.flushed.pop_front();
            state.headers.remove(&sequence);
            self.unpin_root(root)?;
        }
        Ok(())
    }

    fn unpin_root(&self, root: H256) -> Result<(), StoreError> {
        let view = self.backend.begin_read()?;
        let mut write = self.backend.begin_write()?;
        let mut refcounts: HashMap<Vec<u8>, u64> = HashMap::new();
        let mut deleted = 0usize;

        let mut stack = vec![root.as_bytes().to_vec()];
        while let Some(key) = stack.pop() {
            let count = load_refcount(view.as_ref(), &mut refcounts, &key)?;
            if count == 0 {
                // already deleted earlier in this sweep
                continue;
            }
            if count == 1 {
                if let Some(rlp) = view.get(TRIE_NODES, &key)? {
                    stack.extend(node_children(&rlp)?);
                }
                write.delete(TRIE_NODES, key.clone())?;
                write.delete(NODE_REFCOUNTS, key.clone())?;
                refcounts.insert(key, 0);
                deleted += 1;
            } else {
                refcounts.insert(key, count - 1);
            }
        }

        for (key, count) in refcounts {
            if count > 0 {
                write.put(NODE_REFCOUNTS, key, count.to_be_bytes().to_vec())?;
            }
        }
        write.commit()?;
        debug!(root = ?root, deleted, "unpinned root outside retention window");
        Ok(())
    }
}

fn load_refcount(
    view: &dyn StorageReadView,
    cache: &mut HashMap<Vec<u8>, u64>,
    key: &[u8],
) -> Result<u64, StoreError> {
    if let Some(count) = cache.get(key) {
        return Ok(*count);
    }
    let count = read_refcount(view, key)?;
    cache.insert(key.to_vec(), count);
    Ok(count)
}

fn read_refcount(view: &dyn StorageReadView, key: &[u8]) -> Result<u64, StoreError> {
    match view.get(NODE_REFCOUNTS, key)? {
        Some(raw) => {
            let raw: [u8; 8] = raw
                .try_into()
                .map_err(|_| StoreError::CorruptedData("refcount is not 8 bytes".into()))?;
            Ok(u64::from_be_bytes(raw))
        }
        None => Ok(0),
    }
}

/// Hash-scheme keys of every node this node's encoding references: hashed
/// branch children, a hashed extension child, and for account-trie leaves the
/// account's storage root. Inlined children travel inside the parent and have
/// no entries of their own.
fn node_children(rlp: &[u8]) -> Result<Vec<Vec<u8>>, StoreError> {
    let node = Node::decode_raw(rlp)?;
    let children = match node {
        Node::Branch(branch) => branch
            .choices
            .iter()
            .filter_map(|child| match child {
                NodeHash::Hashed(hash) => Some(hash.as_bytes().to_vec()),
                NodeHash::Inline(_) => None,
            })
            .collect(),
        Node::Extension(ext) => match ext.child {
            NodeHash::Hashed(hash) => vec![hash.as_bytes().to_vec()],
            NodeHash::Inline(_) => vec![],
        },
        Node::Leaf(leaf) => AccountState::decode(&leaf.value)
            .ok()
            .filter(|account| account.storage_root != *EMPTY_TRIE_HASH)
            .map(|account| vec![account.storage_root.as_bytes().to_vec()])
            .unwrap_or_default(),
    };
    Ok(children)
}
