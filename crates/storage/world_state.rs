use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use lattice_rlp::{decode::RLPDecode, encode::RLPEncode};
use lattice_trie::Trie;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::account::{
    hash_address, hash_slot, keccak, AccountState, BlockHeader, CommitSpec, EMPTY_CODE_HASH,
};
use crate::api::{StorageBackend, ACCOUNT_CODES};
use crate::config::PruningConfig;
use crate::error::StoreError;
use crate::keys::AddressingScheme;
use crate::pruning::{CommitManager, SharedBuffer};
use crate::trie_db::TrieDbAdapter;

/// Versioned world-state store: account records in a top-level trie, one
/// private storage trie per account, commitment history managed by the
/// pruning configuration.
///
/// One logical writer: a single scope may have mutations in flight at a time.
/// Concurrent readers of other retained roots go through [`view_at`]
/// (WorldState::view_at), which shares the backend and the unflushed node
/// buffer.
pub struct WorldState {
    backend: Arc<dyn StorageBackend>,
    scheme: AddressingScheme,
    manager: Arc<CommitManager>,
    buffer: SharedBuffer,
    scope: Option<Scope>,
}

/// Open mutable view anchored at one historical root, accumulating writes in
/// memory. Nothing reaches the backing store before `commit_tree`.
struct Scope {
    anchor: BlockHeader,
    accounts: FxHashMap<Address, PendingAccount>,
    pending_root: Option<H256>,
    pending_nodes: HashMap<Vec<u8>, Vec<u8>>,
    pending_codes: Vec<(H256, Bytes)>,
}

impl Scope {
    fn new(anchor: BlockHeader) -> Self {
        Scope {
            anchor,
            accounts: FxHashMap::default(),
            pending_root: None,
            pending_nodes: HashMap::new(),
            pending_codes: Vec::new(),
        }
    }
}

/// Buffered mutations for one account. Absolute values, so read-your-writes
/// is a plain overlay.
#[derive(Debug, Clone, Default)]
struct PendingAccount {
    balance: Option<U256>,
    nonce: Option<u64>,
    code: Option<Bytes>,
    storage: FxHashMap<U256, U256>,
}

fn open_trie(
    backend: &Arc<dyn StorageBackend>,
    buffer: &SharedBuffer,
    scheme: AddressingScheme,
    prefix: Vec<u8>,
    root: H256,
) -> Trie {
    let adapter = TrieDbAdapter::new(backend.clone(), buffer.clone(), scheme, prefix);
    Trie::open(Box::new(adapter), root)
}

fn decode_account(rlp: &[u8]) -> Result<AccountState, StoreError> {
    Ok(AccountState::decode(rlp)?)
}

impl WorldState {
    /// Explicit factory: backing store, addressing scheme, pruning policy.
    /// Validates the configuration and the scheme marker before touching any
    /// data.
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        scheme: AddressingScheme,
        config: PruningConfig,
    ) -> Result<WorldState, StoreError> {
        config.validate()?;

        let view = backend.begin_read()?;
        let mut marker_batch = backend.begin_write()?;
        let created = scheme.check_marker(view.as_ref(), marker_batch.as_mut())?;
        marker_batch.commit()?;
        if created {
            debug!(?scheme, mode = ?config.mode, "initialized world state store");
        }

        let buffer = SharedBuffer::default();
        let manager = Arc::new(CommitManager::new(
            backend.clone(),
            scheme,
            config,
            buffer.clone(),
        ));
        Ok(WorldState {
            backend,
            scheme,
            manager,
            buffer,
            scope: None,
        })
    }

    /// Opens a mutable scope anchored at the state root recorded in `header`.
    pub fn begin_scope(&mut self, header: &BlockHeader) -> Result<(), StoreError> {
        if self.scope.is_some() {
            return Err(StoreError::ScopeAlreadyOpen);
        }
        if !self.manager.is_resolvable(header.state_root)? {
            return Err(StoreError::UnresolvableRoot(header.state_root));
        }
        self.scope = Some(Scope::new(header.clone()));
        Ok(())
    }

    fn scope(&self) -> Result<&Scope, StoreError> {
        self.scope.as_ref().ok_or(StoreError::NoOpenScope)
    }

    fn scope_mut(&mut self) -> Result<&mut Scope, StoreError> {
        self.scope.as_mut().ok_or(StoreError::NoOpenScope)
    }

    fn open_state_trie(&self, root: H256) -> Trie {
        open_trie(&self.backend, &self.buffer, self.scheme, Vec::new(), root)
    }

    fn open_storage_trie(&self, hashed_address: H256, root: H256) -> Trie {
        open_trie(
            &self.backend,
            &self.buffer,
            self.scheme,
            hashed_address.as_bytes().to_vec(),
            root,
        )
    }

    fn anchored_account(&self, address: &Address) -> Result<Option<AccountState>, StoreError> {
        let scope = self.scope()?;
        let trie = self.open_state_trie(scope.anchor.state_root);
        trie.get(&hash_address(address).as_bytes().to_vec())?
            .map(|rlp| decode_account(&rlp))
            .transpose()
    }

    /// Effective account record: scope-buffered mutations layered over the
    /// anchored trie.
    pub fn get_account(&self, address: &Address) -> Result<AccountState, StoreError> {
        let mut account = self.anchored_account(address)?.unwrap_or_default();
        if let Some(pending) = self.scope()?.accounts.get(address) {
            if let Some(balance) = pending.balance {
                account.balance = balance;
            }
            if let Some(nonce) = pending.nonce {
                account.nonce = nonce;
            }
            if let Some(code) = &pending.code {
                account.code_hash = keccak(code);
            }
        }
        Ok(account)
    }

    pub fn get_balance(&self, address: &Address) -> Result<U256, StoreError> {
        Ok(self.get_account(address)?.balance)
    }

    pub fn get_nonce(&self, address: &Address) -> Result<u64, StoreError> {
        Ok(self.get_account(address)?.nonce)
    }

    pub fn get_code_hash(&self, address: &Address) -> Result<H256, StoreError> {
        Ok(self.get_account(address)?.code_hash)
    }

    pub fn get_code(&self, address: &Address) -> Result<Bytes, StoreError> {
        if let Some(pending) = self.scope()?.accounts.get(address) {
            if let Some(code) = &pending.code {
                return Ok(code.clone());
            }
        }
        let code_hash = self.get_code_hash(address)?;
        if code_hash == *EMPTY_CODE_HASH {
            return Ok(Bytes::new());
        }
        let view = self.backend.begin_read()?;
        view.get(ACCOUNT_CODES, code_hash.as_bytes())?
            .map(Bytes::from)
            .ok_or_else(|| {
                StoreError::CorruptedData(format!("missing code for hash {code_hash:#x}"))
            })
    }

    /// Current value of a storage slot, zero when absent.
    pub fn get_storage(&self, address: &Address, slot: U256) -> Result<U256, StoreError> {
        if let Some(pending) = self.scope()?.accounts.get(address) {
            if let Some(value) = pending.storage.get(&slot) {
                return Ok(*value);
            }
        }
        let Some(account) = self.anchored_account(address)? else {
            return Ok(U256::zero());
        };
        let hashed_address = hash_address(address);
        let trie = self.open_storage_trie(hashed_address, account.storage_root);
        match trie.get(&hash_slot(&slot).as_bytes().to_vec())? {
            Some(rlp) => Ok(U256::decode(&rlp)?),
            None => Ok(U256::zero()),
        }
    }

    pub fn add_to_balance(&mut self, address: Address, amount: U256) -> Result<(), StoreError> {
        let balance = self.get_balance(&address)?;
        let scope = self.scope_mut()?;
        scope.accounts.entry(address).or_default().balance = Some(balance + amount);
        Ok(())
    }

    pub fn set_nonce(&mut self, address: Address, nonce: u64) -> Result<(), StoreError> {
        let scope = self.scope_mut()?;
        scope.accounts.entry(address).or_default().nonce = Some(nonce);
        Ok(())
    }

    pub fn set_code(&mut self, address: Address, code: Bytes) -> Result<(), StoreError> {
        let scope = self.scope_mut()?;
        scope.accounts.entry(address).or_default().code = Some(code);
        Ok(())
    }

    /// Buffers a storage write; a zero value deletes the slot at commit.
    pub fn set_storage(&mut self, address: Address, slot: U256, value: U256) -> Result<(), StoreError> {
        let scope = self.scope_mut()?;
        scope
            .accounts
            .entry(address)
            .or_default()
            .storage
            .insert(slot, value);
        Ok(())
    }

    /// Resolves all buffered mutations against the tries and returns the
    /// pending state root. Storage tries are committed first so each touched
    /// account record carries its new storage root; accounts ending the
    /// commit empty are removed eagerly when `spec` asks for it. Nothing is
    /// written to the backing store yet.
    pub fn commit(&mut self, spec: &CommitSpec) -> Result<H256, StoreError> {
        let scope = self.scope()?;
        let anchor_root = scope.anchor.state_root;
        let accounts: Vec<(Address, PendingAccount)> = scope
            .accounts
            .iter()
            .map(|(address, pending)| (*address, pending.clone()))
            .collect();

        let mut state_trie = self.open_state_trie(anchor_root);
        let mut nodes: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();
        let mut codes: Vec<(H256, Bytes)> = Vec::new();

        for (address, pending) in accounts {
            let hashed_address = hash_address(&address);
            let account_path = hashed_address.as_bytes().to_vec();
            let mut account = state_trie
                .get(&account_path)?
                .map(|rlp| decode_account(&rlp))
                .transpose()?
                .unwrap_or_default();

            if let Some(balance) = pending.balance {
                account.balance = balance;
            }
            if let Some(nonce) = pending.nonce {
                account.nonce = nonce;
            }
            if let Some(code) = pending.code {
                account.code_hash = keccak(&code);
                if !code.is_empty() {
                    codes.push((account.code_hash, code));
                }
            }

            if !pending.storage.is_empty() {
                let mut storage_trie =
                    self.open_storage_trie(hashed_address, account.storage_root);
                for (slot, value) in pending.storage {
                    let slot_path = hash_slot(&slot).as_bytes().to_vec();
                    if value.is_zero() {
                        storage_trie.remove(&slot_path)?;
                    } else {
                        storage_trie.insert(slot_path, value.encode_to_vec())?;
                    }
                }
                account.storage_root = storage_trie.hash_no_commit();
                for (key, rlp) in storage_trie.collect_commit()? {
                    nodes.insert(
                        self.scheme.node_db_key(hashed_address.as_bytes(), &key),
                        rlp,
                    );
                }
            }

            if spec.remove_empty_accounts && account.is_empty() {
                state_trie.remove(&account_path)?;
            } else {
                state_trie.insert(account_path, account.encode_to_vec())?;
            }
        }

        let root = state_trie.hash_no_commit();
        for (key, rlp) in state_trie.collect_commit()? {
            nodes.insert(self.scheme.node_db_key(&[], &key), rlp);
        }

        let scope = self.scope_mut()?;
        scope.pending_root = Some(root);
        scope.pending_nodes = nodes;
        scope.pending_codes = codes;
        Ok(root)
    }

    /// Hands the pending root and its dirty nodes to the commit manager
    /// tagged with `sequence`, then re-anchors the open scope at the new
    /// root so the caller can keep writing.
    pub fn commit_tree(&mut self, sequence: u64) -> Result<H256, StoreError> {
        let (root, nodes, codes, header) = {
            let scope = self.scope_mut()?;
            let root = scope.pending_root.take().ok_or(StoreError::NoPendingRoot)?;
            let nodes = std::mem::take(&mut scope.pending_nodes);
            let codes = std::mem::take(&mut scope.pending_codes);
            let header = BlockHeader::new(sequence, root, scope.anchor.hash());
            (root, nodes, codes, header)
        };
        self.manager.record(header.clone(), nodes, codes)?;
        self.scope = Some(Scope::new(header));
        Ok(root)
    }

    /// Discards all uncommitted mutations and closes the scope.
    pub fn reset(&mut self) {
        self.scope = None;
    }

    /// Forces the dirty cache down to the backing store (or, in Memory mode,
    /// into the flattened base layer), regardless of flush boundaries.
    pub fn flush_cache(&self) -> Result<(), StoreError> {
        self.manager.flush_cache()
    }

    pub fn get_header(&self, sequence: u64) -> Result<Option<BlockHeader>, StoreError> {
        self.manager.get_header(sequence)
    }

    /// Read-only view of an already committed, still retained root. Shares
    /// the unflushed node buffer, so it can be used concurrently with writes
    /// to the live scope.
    pub fn view_at(&self, state_root: H256) -> Result<HistoricalView, StoreError> {
        if !self.manager.is_resolvable(state_root)? {
            return Err(StoreError::UnresolvableRoot(state_root));
        }
        Ok(HistoricalView {
            backend: self.backend.clone(),
            buffer: self.buffer.clone(),
            scheme: self.scheme,
            state_root,
        })
    }
}

/// Immutable world-state view anchored at a committed root.
pub struct HistoricalView {
    backend: Arc<dyn StorageBackend>,
    buffer: SharedBuffer,
    scheme: AddressingScheme,
    state_root: H256,
}

impl HistoricalView {
    pub fn state_root(&self) -> H256 {
        self.state_root
    }

    pub fn get_account(&self, address: &Address) -> Result<Option<AccountState>, StoreError> {
        let trie = open_trie(
            &self.backend,
            &self.buffer,
            self.scheme,
            Vec::new(),
            self.state_root,
        );
        trie.get(&hash_address(address).as_bytes().to_vec())?
            .map(|rlp| decode_account(&rlp))
            .transpose()
    }

    pub fn get_balance(&self, address: &Address) -> Result<U256, StoreError> {
        Ok(self
            .get_account(address)?
            .map(|account| account.balance)
            .unwrap_or_default())
    }

    pub fn get_nonce(&self, address: &Address) -> Result<u64, StoreError> {
        Ok(self
            .get_account(address)?
            .map(|account| account.nonce)
            .unwrap_or_default())
    }

    pub fn get_storage(&self, address: &Address, slot: U256) -> Result<U256, StoreError> {
        let Some(account) = self.get_account(address)? else {
            return Ok(U256::zero());
        };
        let trie = open_trie(
            &self.backend,
            &self.buffer,
            self.scheme,
            hash_address(address).as_bytes().to_vec(),
            account.storage_root,
        );
        match trie.get(&hash_slot(&slot).as_bytes().to_vec())? {
            Some(rlp) => Ok(U256::decode(&rlp)?),
            None => Ok(U256::zero()),
        }
    }
}
