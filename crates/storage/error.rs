use ethereum_types::H256;
use lattice_rlp::error::RLPDecodeError;
use lattice_trie::TrieError;
use thiserror::Error;

/// Store-level error taxonomy.
///
/// Resolution failures and scope misuse are fatal and never retried; IO
/// errors propagate to the caller without any retry policy of our own;
/// configuration errors are raised before any data is touched.
#[derive(Debug, Error)]
pub enum StoreError {
    // resolution
    #[error("state root {0:#x} is not resolvable (pruned or never committed)")]
    UnresolvableRoot(H256),
    #[error(transparent)]
    Trie(#[from] TrieError),

    // concurrency misuse
    #[error("a scope is already open; commit or reset it before opening another")]
    ScopeAlreadyOpen,
    #[error("no open scope")]
    NoOpenScope,
    #[error("no pending root; call commit before commit_tree")]
    NoPendingRoot,

    // IO / backend
    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
    #[error("missing table: {0}")]
    MissingTable(&'static str),
    #[error("a thread panicked while holding a store lock")]
    LockError,

    // configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(
        "database was created with the {stored:?} addressing scheme, cannot reopen with {requested:?}"
    )]
    AddressingSchemeMismatch {
        stored: crate::keys::AddressingScheme,
        requested: crate::keys::AddressingScheme,
    },

    #[error(transparent)]
    RLPDecode(#[from] RLPDecodeError),
    #[error("corrupted value in store: {0}")]
    CorruptedData(String),
}

impl From<StoreError> for TrieError {
    fn from(err: StoreError) -> TrieError {
        TrieError::DbError(err.into())
    }
}
