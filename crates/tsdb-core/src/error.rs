//! Error taxonomy shared across the storage core.
//!
//! One variant per failure kind named in the engine's error contract; every
//! fallible operation in the workspace ultimately returns (or is converted
//! into) this enum at the point it crosses a crate boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("engine not initialized")]
    NotInitialized,
    #[error("engine already initialized")]
    AlreadyInitialized,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("sample timestamp {timestamp} is not strictly greater than last appended timestamp {last}")]
    Ordering { last: i64, timestamp: i64 },
    #[error("queue is full")]
    QueueFull,
    #[error("operation attempted after close")]
    Shutdown,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt block: {0}")]
    Corrupt(String),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("not found")]
    NotFound,
    #[error("transient failure: {0}")]
    Transient(String),
}

/// Codec-level decode failures (spec §4.1).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated input")]
    Truncated,
    #[error("invalid class or flag byte: {0}")]
    Invalid(u8),
}

pub type Result<T> = std::result::Result<T, Error>;
