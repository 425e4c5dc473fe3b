//! Container primitives for X-Ray engine binary assets.
//!
//! Every binary asset of the engine is built from two layers:
//!
//! - **chunked** streams: sequences of `(id, size, payload)` records whose
//!   payloads may be nested chunked streams or LZHUF-compressed
//! - **packed** streams: flat little-endian fields read and written one after
//!   another inside a chunk payload
//!
//! # Examples
//!
//! ```
//! use xray_data::{ChunkedWriter, PackedWriter, read_chunks};
//!
//! let mut payload = PackedWriter::new();
//! payload.u32(42);
//!
//! let mut writer = ChunkedWriter::new();
//! writer.put_packed(0, &payload)?;
//!
//! let chunk = read_chunks(writer.as_bytes()).next().unwrap()?;
//! assert_eq!(chunk.id, 0);
//! assert_eq!(chunk.reader().u32()?, 42);
//! # Ok::<(), xray_data::DataError>(())
//! ```

#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod chunked;
pub mod compression;
pub mod encoding;
pub mod error;
pub mod packed;

pub use chunked::{
    CHUNK_HEADER_SIZE, COMPRESSED_FLAG, Chunk, ChunkHeader, ChunkedReader, ChunkedWriter,
    find_chunk, read_chunks,
};
pub use error::{DataError, Result};
pub use packed::{PackedReader, PackedWriter, Primitive};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
