use keel_store::StoreError;

/// Errors returned by the mempool.
#[derive(Debug, thiserror::Error)]
pub enum MempoolError {
    /// The admission queue is full. Resubmit later.
    #[error("admission queue full")]
    Overflow,

    /// A block could not be committed and the pipeline stopped.
    #[error("mempool halted after a store failure")]
    Halted,

    /// The mempool was shut down.
    #[error("mempool is shut down")]
    ShutDown,

    #[error("invalid mempool configuration: {0}")]
    InvalidConfig(String),

    /// Store failure that stopped the deliver stage.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A worker task panicked or was cancelled.
    #[error("worker failed: {0}")]
    Worker(String),
}

/// Result alias for mempool operations.
pub type MempoolResult<T> = Result<T, MempoolError>;
