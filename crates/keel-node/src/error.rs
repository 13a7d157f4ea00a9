use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The request was recently rejected, for the given reason.
    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("store error: {0}")]
    Store(#[from] keel_store::StoreError),

    #[error("mempool error: {0}")]
    Mempool(#[from] keel_mempool::MempoolError),
}

pub type NodeResult<T> = Result<T, NodeError>;
