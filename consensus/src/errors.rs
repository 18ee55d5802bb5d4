use thiserror::Error;
use xdag_core::BlockError;
use xdag_database::DbError;

#[derive(Error, Debug)]
pub enum ChainError {
    /// The block can never be admitted; it is dropped and logged at DEBUG.
    #[error("invalid block: {0}")]
    Invalid(#[from] BlockError),

    /// Disk failure. Fatal: the node exits with code 2.
    #[error("store failure: {0}")]
    Store(#[from] DbError),

    /// An internal invariant broke mid-reorganisation. Fatal.
    #[error("reorg failure: {0}")]
    Reorg(String),

    /// Persisted metadata does not match this node's configuration. Fatal.
    #[error("chain metadata mismatch: {0}")]
    Meta(String),
}

impl ChainError {
    /// Whether the process must terminate rather than continue on a
    /// possibly inconsistent ledger.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ChainError::Invalid(_))
    }
}

pub type ChainResult<T> = Result<T, ChainError>;
