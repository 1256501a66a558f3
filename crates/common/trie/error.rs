use lattice_rlp::error::RLPDecodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrieError {
    #[error(transparent)]
    RLPDecode(#[from] RLPDecodeError),
    #[error("Inconsistent internal tree structure")]
    InconsistentTree,
    #[error("Database error: {0}")]
    DbError(anyhow::Error),
    #[error("A thread panicked while holding a trie lock")]
    LockError,
}
