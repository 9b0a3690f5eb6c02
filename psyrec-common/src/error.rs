//! Common error types for psyrec

use thiserror::Error;

/// Common result type for psyrec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across psyrec crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Value could not be parsed under the expected format
    #[error("Parse error: {0}")]
    Parse(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
