//! Versioned, trie-indexed world-state store.
//!
//! Account balances, nonces, code, and per-contract storage slots live in
//! Merkle Patricia tries over a narrow key-value backend. Callers mutate a
//! scoped working copy, commit it into a new state root, and the
//! commit/pruning manager decides when nodes become durable and when
//! out-of-window history gets reclaimed.

mod account;
mod config;
mod error;
mod keys;
mod pruning;
mod trie_db;
mod world_state;

pub mod api;
pub mod backend;

pub use account::{
    hash_address, hash_slot, keccak, AccountState, BlockHeader, CommitSpec, EMPTY_CODE_HASH,
};
pub use config::{BackendOptions, PruningConfig, PruningMode};
pub use error::StoreError;
pub use keys::AddressingScheme;
pub use world_state::{HistoricalView, WorldState};

pub use lattice_trie::EMPTY_TRIE_HASH;
