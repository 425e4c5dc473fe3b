//! Error types for container I/O

use std::io;
use thiserror::Error;

/// Result type alias for container operations
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors raised while reading or writing chunked and packed data
#[derive(Error, Debug)]
pub enum DataError {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Corrupt or unsupported layout
    #[error("Invalid format: {0}")]
    Format(String),

    /// A read ran past the end of the buffer
    #[error("Unexpected end of data: needed {needed} bytes at offset {offset}, {available} available")]
    UnexpectedEof {
        /// Offset of the failed read
        offset: usize,
        /// Number of bytes requested
        needed: usize,
        /// Number of bytes left in the buffer
        available: usize,
    },

    /// The next chunk does not carry the expected id
    #[error("Unexpected chunk: expected 0x{expected:X}, found 0x{found:X}")]
    UnexpectedChunk {
        /// Id the caller asked for
        expected: u32,
        /// Id found in the stream
        found: u32,
    },
}

impl DataError {
    /// Create a new Format error
    pub fn format<S: Into<String>>(msg: S) -> Self {
        Self::Format(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DataError::UnexpectedChunk {
            expected: 0x0E,
            found: 0x0F,
        };
        assert_eq!(
            error.to_string(),
            "Unexpected chunk: expected 0xE, found 0xF"
        );

        let error = DataError::UnexpectedEof {
            offset: 4,
            needed: 4,
            available: 2,
        };
        assert!(error.to_string().contains("needed 4 bytes at offset 4"));
    }
}
