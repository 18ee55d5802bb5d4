use thiserror::Error;
use xdag_consensus::ChainError;
use xdag_database::DbError;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("store failure: {0}")]
    Store(#[from] DbError),

    #[error("chain failure: {0}")]
    Chain(#[from] ChainError),

    #[error("cryptographic failure: {0}")]
    Crypto(String),

    #[error("network setup failure: {0}")]
    Bind(#[from] std::io::Error),
}

impl NodeError {
    /// Process exit code: 1 invalid config, 2 store corruption, 3 crypto
    /// failure at boot.
    pub fn exit_code(&self) -> i32 {
        match self {
            NodeError::Config(_) | NodeError::Bind(_) => 1,
            NodeError::Store(_) => 2,
            NodeError::Chain(err) => match err {
                ChainError::Store(_) | ChainError::Reorg(_) | ChainError::Meta(_) => 2,
                ChainError::Invalid(_) => 1,
            },
            NodeError::Crypto(_) => 3,
        }
    }
}

pub type NodeResult<T> = Result<T, NodeError>;
