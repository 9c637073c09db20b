//! Error types for pool operations

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("credential pool exhausted: {excluded} of {total} credentials excluded")]
    PoolExhausted { total: usize, excluded: usize },
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
