//! Error types for the storage seam

use thiserror::Error;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding or decoding persisted state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("corrupt buffer: {0}")]
    Corrupt(String),
}
