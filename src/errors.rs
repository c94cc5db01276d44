use thiserror::Error;

/// Error taxonomy for the store. Mirrors the shape of a typical storage-engine
/// error enum: one variant per failure class the caller can reasonably act on.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("null or empty argument: {0}")]
    NullArgument(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("buffer full: no clean entry available for eviction")]
    BufferFull,

    #[error("precondition violated: {0}")]
    PrecondViolation(String),
}

pub type KvResult<T> = Result<T, KvError>;
