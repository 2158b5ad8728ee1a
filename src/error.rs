//! Error types for zipio

use std::io;

use thiserror::Error;

/// Result type for zipio operations
pub type Result<T> = std::result::Result<T, ZipError>;

/// Error types that can occur during ZIP operations
#[derive(Debug, Error)]
pub enum ZipError {
    /// I/O error from the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid argument or handle state
    #[error("invalid argument: {0}")]
    Param(&'static str),

    /// Invalid ZIP format or structure
    #[error("invalid ZIP format: {0}")]
    Format(&'static str),

    /// Unsupported compression method
    #[error("unsupported compression method: {0}")]
    UnsupportedMethod(u16),

    /// Feature not compiled in or conversion not available
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// CRC-32 mismatch on a fully consumed payload
    #[error("CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    Crc { expected: u32, actual: u32 },

    /// Entry not found in the archive
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// The underlying stream ended before the expected data
    #[error("unexpected end of stream")]
    EndOfStream,

    /// Iteration moved past the last central directory entry.
    ///
    /// This is a normal termination condition, not a failure.
    #[error("no more entries")]
    EndOfList,

    /// Internal invariant violated
    #[error("internal error: {0}")]
    Internal(&'static str),

    /// Incorrect password for an encrypted entry
    #[cfg(feature = "encryption")]
    #[error("incorrect password")]
    IncorrectPassword,

    /// Authentication trailer mismatch on an AES entry
    #[cfg(feature = "encryption")]
    #[error("authentication failed: file may be corrupted or password is incorrect")]
    AuthFailed,
}

impl ZipError {
    /// True for the iteration terminator.
    pub fn is_end_of_list(&self) -> bool {
        matches!(self, ZipError::EndOfList)
    }
}
