use lattice_rlp::encode::RLPEncode;
use rustc_hash::FxHashMap;

use crate::db::TrieDB;
use crate::error::TrieError;
use crate::nibbles::Nibbles;
use crate::node::Node;
use crate::node_hash::NodeHash;
use crate::node_key::NodeKey;

/// Stores the trie's dirty nodes and the backing store they get flushed to.
///
/// Mutations go through the cache, reads fall back to the database on a cache
/// miss. The cache tracks its encoded size so callers can flush once it grows
/// past whatever budget they operate under.
pub struct TrieState {
    db: Box<dyn TrieDB>,
    cache: FxHashMap<NodeHash, Node>,
    cache_bytes: usize,
}

impl TrieState {
    pub fn new(db: Box<dyn TrieDB>) -> TrieState {
        TrieState {
            db,
            cache: Default::default(),
            cache_bytes: 0,
        }
    }

    /// Retrieves a node, looking into the cache first. `path` is the traversal
    /// position, its consumed prefix is the node's absolute path.
    pub fn get_node(&self, hash: NodeHash, path: &Nibbles) -> Result<Option<Node>, TrieError> {
        self.get_node_at(hash, path.current())
    }

    /// Retrieves a node given its absolute path from the trie root.
    pub fn get_node_at(&self, hash: NodeHash, path: Nibbles) -> Result<Option<Node>, TrieError> {
        let hashed = match hash {
            // inline nodes carry their own encoding
            NodeHash::Inline((encoded, len)) if len > 0 => {
                return Ok(Some(Node::decode_raw(&encoded[..len as usize])?));
            }
            NodeHash::Inline(_) => return Ok(None),
            NodeHash::Hashed(hashed) => hashed,
        };
        if let Some(node) = self.cache.get(&hash) {
            return Ok(Some(node.clone()));
        }
        self.db
            .get(&NodeKey::new(path, hashed))?
            .map(|rlp| Node::decode_raw(&rlp).map_err(TrieError::RLPDecode))
            .transpose()
    }

    /// Adds a node to the dirty cache. Inline nodes are skipped, they travel
    /// embedded in their parent's encoding.
    pub fn insert_node(&mut self, node: Node, hash: NodeHash) {
        if matches!(hash, NodeHash::Hashed(_)) {
            self.cache_bytes += node.length();
            if let Some(old) = self.cache.insert(hash, node) {
                self.cache_bytes = self.cache_bytes.saturating_sub(old.length());
            }
        }
    }

    /// Encoded size of all cached dirty nodes.
    pub fn cache_size_bytes(&self) -> usize {
        self.cache_bytes
    }

    /// Drains the dirty nodes reachable from `root` and returns them as a
    /// write batch, parents before children. Cached nodes left unreachable by
    /// later updates are dropped.
    pub fn collect_commit(
        &mut self,
        root: NodeHash,
    ) -> Result<Vec<(NodeKey, Vec<u8>)>, TrieError> {
        let mut batch = Vec::new();

        // a root small enough to be inlined is still persisted under its hash,
        // and cannot reference hashed children (they wouldn't fit)
        if let NodeHash::Inline((encoded, len)) = root {
            if len > 0 {
                batch.push((
                    NodeKey::new(Nibbles::default(), root.finalize()),
                    encoded[..len as usize].to_vec(),
                ));
            }
            self.clear_cache();
            return Ok(batch);
        }

        let mut stack = vec![(root, Nibbles::default())];
        while let Some((hash, path)) = stack.pop() {
            let NodeHash::Hashed(hashed) = hash else {
                continue;
            };
            // clean subtries are not in the cache and need no rewrite
            let Some(node) = self.cache.remove(&hash) else {
                continue;
            };
            self.cache_bytes = self.cache_bytes.saturating_sub(node.length());
            match &node {
                Node::Branch(branch) => {
                    for (choice, child) in branch.choices.iter().enumerate() {
                        if child.is_valid() {
                            stack.push((*child, path.append_new(choice as u8)));
                        }
                    }
                }
                Node::Extension(ext) => stack.push((ext.child, path.concat(&ext.prefix))),
                Node::Leaf(_) => {}
            }
            batch.push((NodeKey::new(path, hashed), node.encode_to_vec()));
        }
        self.clear_cache();
        Ok(batch)
    }

    /// Flushes the dirty nodes reachable from `root` to the backing store.
    pub fn commit(&mut self, root: NodeHash) -> Result<(), TrieError> {
        let batch = self.collect_commit(root)?;
        self.db.put_batch(batch)
    }

    /// Discards all dirty nodes.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.cache_bytes = 0;
    }

    pub fn db(&self) -> &dyn TrieDB {
        self.db.as_ref()
    }
}
