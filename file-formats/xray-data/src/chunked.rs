//! Chunked (TLV) streams
//!
//! A chunked stream is a sequence of chunks laid end to end:
//!
//! ```text
//! Offset | Size | Field | Description
//! -------|------|-------|------------------------------------------
//! 0x00   |  4   | id    | Chunk id; bit 31 flags a compressed payload
//! 0x04   |  4   | size  | Payload size in bytes (excludes header)
//! 0x08   | size | data  | Payload, often a nested chunked stream
//! ```
//!
//! A compressed payload starts with its decompressed size (u32) followed by
//! an LZHUF stream. Readers hand out the decompressed bytes and report the id
//! with the compression bit cleared. Writers never compress.

use std::borrow::Cow;
use std::io::Cursor;

use binrw::BinRead;

use crate::compression;
use crate::error::{DataError, Result};
use crate::packed::{PackedReader, PackedWriter};

/// Bit of the on-disk id marking a compressed payload
pub const COMPRESSED_FLAG: u32 = 0x8000_0000;

/// Size of a chunk header
pub const CHUNK_HEADER_SIZE: usize = 8;

/// Raw 8-byte chunk header
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead)]
#[br(little)]
pub struct ChunkHeader {
    /// On-disk id, compression flag included
    pub id: u32,
    /// Payload size in bytes (excludes the 8-byte header)
    pub size: u32,
}

impl ChunkHeader {
    /// Parse a header at `offset` of `data`
    pub fn parse(data: &[u8], offset: usize) -> Result<Self> {
        let available = data.len().saturating_sub(offset);
        if available < CHUNK_HEADER_SIZE {
            return Err(DataError::UnexpectedEof {
                offset,
                needed: CHUNK_HEADER_SIZE,
                available,
            });
        }
        let mut cursor = Cursor::new(&data[offset..offset + CHUNK_HEADER_SIZE]);
        Self::read(&mut cursor)
            .map_err(|e| DataError::format(format!("bad chunk header at offset {offset}: {e}")))
    }

    /// Id with the compression flag cleared
    pub const fn chunk_id(&self) -> u32 {
        self.id & !COMPRESSED_FLAG
    }

    /// Whether the payload is compressed
    pub const fn is_compressed(&self) -> bool {
        self.id & COMPRESSED_FLAG != 0
    }

    /// Total size including header (size + 8)
    pub const fn total_size(&self) -> usize {
        self.size as usize + CHUNK_HEADER_SIZE
    }

    /// Encode the header
    pub fn to_bytes(&self) -> [u8; CHUNK_HEADER_SIZE] {
        let mut raw = [0u8; CHUNK_HEADER_SIZE];
        raw[..4].copy_from_slice(&self.id.to_le_bytes());
        raw[4..].copy_from_slice(&self.size.to_le_bytes());
        raw
    }
}

/// One chunk of a chunked stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Id with the compression flag cleared
    pub id: u32,
    /// Whether the payload was stored compressed
    pub compressed: bool,
    /// Offset of the chunk header in the enclosing buffer
    pub offset: usize,
    /// Payload, decompressed if it was stored compressed
    pub data: Cow<'a, [u8]>,
}

impl Chunk<'_> {
    /// Payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Offset of the payload in the enclosing buffer
    pub const fn payload_offset(&self) -> usize {
        self.offset + CHUNK_HEADER_SIZE
    }

    /// Packed reader over the payload
    pub fn reader(&self) -> PackedReader<'_> {
        PackedReader::new(&self.data)
    }

    /// Chunked reader over the payload
    pub fn chunks(&self) -> ChunkedReader<'_> {
        ChunkedReader::new(&self.data)
    }
}

/// Read the chunks of a buffer one after another
pub fn read_chunks(data: &[u8]) -> ChunkedReader<'_> {
    ChunkedReader::new(data)
}

/// Find the first chunk with the given id anywhere in the buffer
pub fn find_chunk(data: &[u8], id: u32) -> Result<Option<Chunk<'_>>> {
    for chunk in read_chunks(data) {
        let chunk = chunk?;
        if chunk.id == id {
            return Ok(Some(chunk));
        }
    }
    Ok(None)
}

/// Sequential, single-pass reader over a chunked stream
///
/// Iteration yields `Result<Chunk>`; after the first error the reader is
/// exhausted.
#[derive(Debug, Clone)]
pub struct ChunkedReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ChunkedReader<'a> {
    /// Create a reader over `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Offset of the next header
    pub fn position(&self) -> usize {
        self.position
    }

    /// Whether every chunk has been read
    pub fn is_end(&self) -> bool {
        self.position >= self.data.len()
    }

    /// Header of the next chunk without consuming it
    pub fn peek_header(&self) -> Result<Option<ChunkHeader>> {
        if self.is_end() {
            return Ok(None);
        }
        let header = ChunkHeader::parse(self.data, self.position)?;
        let available = self.data.len() - self.position - CHUNK_HEADER_SIZE;
        if header.size as usize > available {
            return Err(DataError::format(format!(
                "chunk 0x{:X} at offset {} declares {} bytes, only {} remain",
                header.chunk_id(),
                self.position,
                header.size,
                available
            )));
        }
        Ok(Some(header))
    }

    fn read_next(&mut self) -> Result<Option<Chunk<'a>>> {
        let Some(header) = self.peek_header()? else {
            return Ok(None);
        };
        let offset = self.position;
        let start = offset + CHUNK_HEADER_SIZE;
        let end = start + header.size as usize;
        self.position = end;

        let raw = &self.data[start..end];
        let data = if header.is_compressed() {
            let decompressed = compression::decompress_payload(raw)?;
            log::debug!(
                "chunk 0x{:X}: decompressed {} -> {} bytes",
                header.chunk_id(),
                raw.len(),
                decompressed.len()
            );
            Cow::Owned(decompressed)
        } else {
            Cow::Borrowed(raw)
        };

        Ok(Some(Chunk {
            id: header.chunk_id(),
            compressed: header.is_compressed(),
            offset,
            data,
        }))
    }

    /// Read the next chunk, failing if it is missing or has another id
    pub fn next_expect(&mut self, id: u32) -> Result<Chunk<'a>> {
        match self.read_next()? {
            Some(chunk) if chunk.id == id => Ok(chunk),
            Some(chunk) => Err(DataError::UnexpectedChunk {
                expected: id,
                found: chunk.id,
            }),
            None => Err(DataError::format(format!(
                "expected chunk 0x{id:X}, reached end of stream"
            ))),
        }
    }

    /// Read the next chunk if it has the given id
    ///
    /// A chunk with another id is left in place and `None` is returned.
    pub fn next_lookup(&mut self, id: u32) -> Result<Option<Chunk<'a>>> {
        match self.peek_header()? {
            Some(header) if header.chunk_id() == id => self.read_next(),
            _ => Ok(None),
        }
    }

    /// Read chunks until one with the given id is found
    pub fn get_chunk(&mut self, id: u32) -> Result<Option<Chunk<'a>>> {
        while let Some(chunk) = self.read_next()? {
            if chunk.id == id {
                return Ok(Some(chunk));
            }
        }
        Ok(None)
    }
}

impl<'a> Iterator for ChunkedReader<'a> {
    type Item = Result<Chunk<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(chunk) => chunk.map(Ok),
            Err(e) => {
                self.position = self.data.len();
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for ChunkedReader<'_> {}

/// Accumulating chunked stream writer
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChunkedWriter {
    data: Vec<u8>,
}

impl ChunkedWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk with the given payload
    pub fn put(&mut self, id: u32, payload: &[u8]) -> Result<&mut Self> {
        if id & COMPRESSED_FLAG != 0 {
            return Err(DataError::format(format!(
                "chunk id 0x{id:X} collides with the compression flag"
            )));
        }
        let size = u32::try_from(payload.len()).map_err(|_| {
            DataError::format(format!(
                "chunk 0x{id:X} payload of {} bytes does not fit a 32-bit size",
                payload.len()
            ))
        })?;
        self.data
            .extend_from_slice(&ChunkHeader { id, size }.to_bytes());
        self.data.extend_from_slice(payload);
        Ok(self)
    }

    /// Append a chunk holding a packed payload
    pub fn put_packed(&mut self, id: u32, payload: &PackedWriter) -> Result<&mut Self> {
        self.put(id, payload.as_bytes())
    }

    /// Append a chunk holding a nested chunked stream
    pub fn put_chunked(&mut self, id: u32, payload: &Self) -> Result<&mut Self> {
        self.put(id, &payload.data)
    }

    /// Written bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the writer
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Number of bytes written so far, chunk headers included
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether no chunk was written yet
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::lzhuf::tests::{Token, encode_tokens};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_chunk() {
        let data = [
            0x00, 0x00, 0x00, 0x00, // id 0
            0x04, 0x00, 0x00, 0x00, // size 4
            0x2A, 0x00, 0x00, 0x00, // payload 42
        ];
        let chunks: Vec<Chunk<'_>> = read_chunks(&data).collect::<Result<_>>().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, 0);
        assert!(!chunks[0].compressed);
        assert_eq!(chunks[0].data(), &[0x2A, 0, 0, 0]);
        assert_eq!(chunks[0].reader().u32().unwrap(), 42);
    }

    #[test]
    fn test_writer_reader_symmetry() {
        let mut inner = ChunkedWriter::new();
        inner.put(1, b"one").unwrap().put(2, b"two").unwrap();

        let mut outer = ChunkedWriter::new();
        outer.put(0x0E, &[]).unwrap();
        outer.put_chunked(0x0F, &inner).unwrap();

        let mut reader = read_chunks(outer.as_bytes());
        assert!(reader.next_expect(0x0E).unwrap().data().is_empty());
        let nested = reader.next_expect(0x0F).unwrap();
        assert!(reader.is_end());

        let ids: Vec<u32> = nested.chunks().map(|c| c.unwrap().id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_size_exceeds_buffer() {
        let data = [0x01, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0xAA];
        let mut reader = read_chunks(&data);
        assert!(matches!(reader.next(), Some(Err(DataError::Format(_)))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_truncated_header() {
        let data = [0x01, 0x00, 0x00];
        assert!(matches!(
            read_chunks(&data).next(),
            Some(Err(DataError::UnexpectedEof { .. }))
        ));
    }

    #[test]
    fn test_expect_mismatch_and_lookup() {
        let mut writer = ChunkedWriter::new();
        writer.put(3, b"x").unwrap().put(4, b"y").unwrap();

        let mut reader = read_chunks(writer.as_bytes());
        assert!(reader.next_lookup(4).unwrap().is_none());
        // The lookup left chunk 3 in place
        assert_eq!(reader.next_lookup(3).unwrap().unwrap().data(), b"x");
        assert!(matches!(
            reader.clone().next_expect(9),
            Err(DataError::UnexpectedChunk {
                expected: 9,
                found: 4
            })
        ));
        assert_eq!(reader.get_chunk(4).unwrap().unwrap().data(), b"y");
    }

    #[test]
    fn test_find_chunk() {
        let mut writer = ChunkedWriter::new();
        writer.put(0x0E, b"motions").unwrap();
        writer.put(0x0F, b"params").unwrap();
        let chunk = find_chunk(writer.as_bytes(), 0x0F).unwrap().unwrap();
        assert_eq!(chunk.offset, 15);
        assert_eq!(chunk.payload_offset(), 23);
        assert!(find_chunk(writer.as_bytes(), 0x10).unwrap().is_none());
    }

    #[test]
    fn test_compressed_chunk() {
        let text = b"compressed payload";
        let tokens: Vec<Token> = text.iter().map(|&b| Token::Literal(b)).collect();
        let stream = encode_tokens(&tokens);

        let mut payload = (text.len() as u32).to_le_bytes().to_vec();
        payload.extend_from_slice(&stream);

        let mut data = Vec::new();
        data.extend_from_slice(&(0x12 | COMPRESSED_FLAG).to_le_bytes());
        data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        data.extend_from_slice(&payload);

        let chunk = read_chunks(&data).next().unwrap().unwrap();
        assert_eq!(chunk.id, 0x12);
        assert!(chunk.compressed);
        assert_eq!(chunk.data(), text);
    }

    #[test]
    fn test_writer_rejects_flagged_id() {
        let mut writer = ChunkedWriter::new();
        assert!(writer.put(COMPRESSED_FLAG | 1, b"").is_err());
    }
}
