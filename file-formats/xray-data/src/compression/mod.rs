//! Decompression of compressed chunk payloads
//!
//! The engine only ever stores one kind of compressed payload, LZHUF, so there
//! is no method byte to dispatch on: a chunk flagged as compressed starts with
//! its decompressed size followed by the LZHUF stream.

pub mod lzhuf;

use crate::error::{DataError, Result};

/// Decompress a compressed chunk payload (size prefix included)
pub fn decompress_payload(payload: &[u8]) -> Result<Vec<u8>> {
    let Some((size, stream)) = payload.split_first_chunk::<4>() else {
        return Err(DataError::format(format!(
            "compressed chunk payload of {} bytes has no size prefix",
            payload.len()
        )));
    };
    let size = u32::from_le_bytes(*size) as usize;
    lzhuf::decompress(stream, size)
}

pub use lzhuf::decompress;
