//! LZHUF decompression
//!
//! Compressed chunks use Haruyasu Yoshizaki's LZHUF: an LZSS sliding window
//! whose literals and match lengths are coded with an adaptive Huffman tree,
//! and whose match positions are coded with a fixed prefix table for the upper
//! six bits followed by the lower six bits verbatim.
//!
//! The stream carries no end marker. Decoding stops once the caller-supplied
//! output length has been produced.

use crate::error::{DataError, Result};

/// Size of the sliding window
const WINDOW_SIZE: usize = 4096;
/// Longest match
const LOOKAHEAD: usize = 60;
/// Matches no longer than this are stored as literals
const THRESHOLD: usize = 2;
/// Literal bytes plus match-length codes
pub(crate) const N_CHAR: usize = 256 - THRESHOLD + LOOKAHEAD;
/// Number of tree nodes
pub(crate) const TABLE_SIZE: usize = N_CHAR * 2 - 1;
/// Index of the root node
pub(crate) const ROOT: usize = TABLE_SIZE - 1;
/// Frequencies are halved when the root reaches this value
const MAX_FREQ: u32 = 0x8000;

/// Run lengths of the position prefix table: `(upper six bits, run)` pairs
/// expanded into `D_CODE` in order.
const D_CODE_RUNS: [(u8, usize); 4] = [(0x00, 32), (0x01, 16), (0x02, 16), (0x03, 16)];

/// Upper six bits of a match position, indexed by the first byte read
pub(crate) const D_CODE: [u8; 256] = build_d_code();
/// Total bit length of the position prefix, indexed by the first byte read
pub(crate) const D_LEN: [u8; 256] = build_d_len();

const fn build_d_code() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut index = 0;
    let mut run = 0;
    while run < D_CODE_RUNS.len() {
        let (code, count) = D_CODE_RUNS[run];
        let mut i = 0;
        while i < count {
            table[index] = code;
            index += 1;
            i += 1;
        }
        run += 1;
    }
    // Codes 0x04..0x0B take 8 slots, 0x0C..0x17 four, 0x18..0x2F two and
    // 0x30..0x3F one.
    let mut code = 0x04u8;
    while index < 256 {
        let count = if code < 0x0C {
            8
        } else if code < 0x18 {
            4
        } else if code < 0x30 {
            2
        } else {
            1
        };
        let mut i = 0;
        while i < count {
            table[index] = code;
            index += 1;
            i += 1;
        }
        code += 1;
    }
    table
}

const fn build_d_len() -> [u8; 256] {
    let runs: [(u8, usize); 6] = [(3, 32), (4, 48), (5, 64), (6, 48), (7, 48), (8, 16)];
    let mut table = [0u8; 256];
    let mut index = 0;
    let mut run = 0;
    while run < runs.len() {
        let (len, count) = runs[run];
        let mut i = 0;
        while i < count {
            table[index] = len;
            index += 1;
            i += 1;
        }
        run += 1;
    }
    table
}

/// MSB-first bit reader that fails instead of padding past the end
struct BitReader<'a> {
    data: &'a [u8],
    bit_position: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            bit_position: 0,
        }
    }

    fn bit(&mut self) -> Result<usize> {
        let byte = self.bit_position / 8;
        let Some(&value) = self.data.get(byte) else {
            return Err(DataError::format(format!(
                "LZHUF stream underflow after {} bytes",
                self.data.len()
            )));
        };
        let shift = 7 - (self.bit_position % 8);
        self.bit_position += 1;
        Ok(usize::from((value >> shift) & 1))
    }

    fn byte(&mut self) -> Result<usize> {
        let mut value = 0;
        for _ in 0..8 {
            value = (value << 1) | self.bit()?;
        }
        Ok(value)
    }
}

/// Adaptive Huffman tree shared by the decoder (and the test encoder)
pub(crate) struct AdaptiveHuffman {
    /// Node frequencies; `freq[TABLE_SIZE]` is a sentinel
    pub(crate) freq: [u32; TABLE_SIZE + 1],
    /// Parent links; entries `TABLE_SIZE..` point from leaves to their node
    pub(crate) parent: [usize; TABLE_SIZE + N_CHAR],
    /// Child links; values `>= TABLE_SIZE` are leaves (`symbol + TABLE_SIZE`)
    pub(crate) son: [usize; TABLE_SIZE],
}

impl AdaptiveHuffman {
    pub(crate) fn new() -> Self {
        let mut tree = Self {
            freq: [0; TABLE_SIZE + 1],
            parent: [0; TABLE_SIZE + N_CHAR],
            son: [0; TABLE_SIZE],
        };

        for symbol in 0..N_CHAR {
            tree.freq[symbol] = 1;
            tree.son[symbol] = symbol + TABLE_SIZE;
            tree.parent[symbol + TABLE_SIZE] = symbol;
        }

        let mut child = 0;
        for node in N_CHAR..=ROOT {
            tree.freq[node] = tree.freq[child] + tree.freq[child + 1];
            tree.son[node] = child;
            tree.parent[child] = node;
            tree.parent[child + 1] = node;
            child += 2;
        }

        tree.freq[TABLE_SIZE] = 0xFFFF;
        tree.parent[ROOT] = 0;
        tree
    }

    /// Halve all frequencies and rebuild the tree
    fn reconstruct(&mut self) {
        // Collect the leaves into the first half of the table
        let mut leaf = 0;
        for node in 0..TABLE_SIZE {
            if self.son[node] >= TABLE_SIZE {
                self.freq[leaf] = self.freq[node].div_ceil(2);
                self.son[leaf] = self.son[node];
                leaf += 1;
            }
        }

        // Join pairs into internal nodes, keeping the table sorted
        let mut child = 0;
        for node in N_CHAR..TABLE_SIZE {
            let f = self.freq[child] + self.freq[child + 1];
            self.freq[node] = f;

            let mut insert = node;
            while insert > 0 && f < self.freq[insert - 1] {
                insert -= 1;
            }
            self.freq.copy_within(insert..node, insert + 1);
            self.freq[insert] = f;
            self.son.copy_within(insert..node, insert + 1);
            self.son[insert] = child;

            child += 2;
        }

        for node in 0..TABLE_SIZE {
            let son = self.son[node];
            if son >= TABLE_SIZE {
                self.parent[son] = node;
            } else {
                self.parent[son] = node;
                self.parent[son + 1] = node;
            }
        }
    }

    /// Account for one more occurrence of `symbol`
    pub(crate) fn update(&mut self, symbol: usize) {
        if self.freq[ROOT] == MAX_FREQ {
            self.reconstruct();
        }

        let mut node = self.parent[symbol + TABLE_SIZE];
        loop {
            self.freq[node] += 1;
            let k = self.freq[node];

            // Keep frequencies ordered by swapping with the last node of a
            // smaller frequency
            if k > self.freq[node + 1] {
                let mut swap = node + 1;
                while k > self.freq[swap + 1] {
                    swap += 1;
                }

                self.freq[node] = self.freq[swap];
                self.freq[swap] = k;

                let i = self.son[node];
                self.parent[i] = swap;
                if i < TABLE_SIZE {
                    self.parent[i + 1] = swap;
                }

                let j = self.son[swap];
                self.son[swap] = i;

                self.parent[j] = node;
                if j < TABLE_SIZE {
                    self.parent[j + 1] = node;
                }
                self.son[node] = j;

                node = swap;
            }

            node = self.parent[node];
            if node == 0 {
                break;
            }
        }
    }

    fn decode_char(&mut self, bits: &mut BitReader<'_>) -> Result<usize> {
        let mut node = self.son[ROOT];
        while node < TABLE_SIZE {
            node = self.son[node + bits.bit()?];
        }
        let symbol = node - TABLE_SIZE;
        self.update(symbol);
        Ok(symbol)
    }
}

fn decode_position(bits: &mut BitReader<'_>) -> Result<usize> {
    let mut i = bits.byte()?;
    let upper = usize::from(D_CODE[i]) << 6;
    let extra = usize::from(D_LEN[i]) - 2;
    for _ in 0..extra {
        i = (i << 1) | bits.bit()?;
    }
    Ok(upper | (i & 0x3F))
}

/// Decompress an LZHUF stream into exactly `output_size` bytes
pub fn decompress(data: &[u8], output_size: usize) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(output_size);
    if output_size == 0 {
        return Ok(output);
    }

    let mut bits = BitReader::new(data);
    let mut tree = AdaptiveHuffman::new();
    let mut window = [b' '; WINDOW_SIZE];
    let mut r = WINDOW_SIZE - LOOKAHEAD;

    while output.len() < output_size {
        let c = tree.decode_char(&mut bits)?;
        if c < 256 {
            let byte = c as u8;
            output.push(byte);
            window[r] = byte;
            r = (r + 1) & (WINDOW_SIZE - 1);
        } else {
            let position = decode_position(&mut bits)?;
            let start = (r + WINDOW_SIZE - position - 1) & (WINDOW_SIZE - 1);
            let length = c - 255 + THRESHOLD;
            for k in 0..length {
                if output.len() == output_size {
                    break;
                }
                let byte = window[(start + k) & (WINDOW_SIZE - 1)];
                output.push(byte);
                window[r] = byte;
                r = (r + 1) & (WINDOW_SIZE - 1);
            }
        }
    }

    log::trace!(
        "LZHUF: {} compressed bytes -> {} bytes",
        data.len(),
        output.len()
    );
    Ok(output)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Token of a hand-built stream
    pub(crate) enum Token {
        Literal(u8),
        /// Copy `length` bytes starting `distance + 1` bytes back
        Match { distance: usize, length: usize },
    }

    #[derive(Default)]
    struct BitWriter {
        bytes: Vec<u8>,
        used: u32,
    }

    impl BitWriter {
        fn push(&mut self, bit: bool) {
            if self.used % 8 == 0 {
                self.bytes.push(0);
            }
            if bit {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 0x80 >> (self.used % 8);
            }
            self.used += 1;
        }

        fn push_bits(&mut self, value: usize, count: usize) {
            for shift in (0..count).rev() {
                self.push((value >> shift) & 1 == 1);
            }
        }
    }

    impl AdaptiveHuffman {
        fn encode_char(&mut self, symbol: usize, out: &mut BitWriter) {
            let mut path = Vec::new();
            let mut node = self.parent[symbol + TABLE_SIZE];
            loop {
                path.push(node & 1 == 1);
                node = self.parent[node];
                if node == ROOT {
                    break;
                }
            }
            for &bit in path.iter().rev() {
                out.push(bit);
            }
            self.update(symbol);
        }
    }

    fn encode_position(position: usize, out: &mut BitWriter) {
        let upper = (position >> 6) as u8;
        let first = D_CODE
            .iter()
            .position(|&code| code == upper)
            .expect("every upper value has a prefix");
        let len = usize::from(D_LEN[first]);
        out.push_bits(first >> (8 - len), len);
        out.push_bits(position & 0x3F, 6);
    }

    /// Encode tokens with the same model the decoder uses
    pub(crate) fn encode_tokens(tokens: &[Token]) -> Vec<u8> {
        let mut tree = AdaptiveHuffman::new();
        let mut out = BitWriter::default();
        for token in tokens {
            match *token {
                Token::Literal(byte) => tree.encode_char(usize::from(byte), &mut out),
                Token::Match { distance, length } => {
                    tree.encode_char(length + 255 - THRESHOLD, &mut out);
                    encode_position(distance, &mut out);
                }
            }
        }
        out.bytes
    }

    #[test]
    fn test_prefix_tables() {
        assert_eq!(D_CODE[0], 0x00);
        assert_eq!(D_CODE[32], 0x01);
        assert_eq!(D_CODE[80], 0x04);
        assert_eq!(D_CODE[144], 0x0C);
        assert_eq!(D_CODE[192], 0x18);
        assert_eq!(D_CODE[240], 0x30);
        assert_eq!(D_CODE[255], 0x3F);
        assert_eq!(D_LEN[0], 3);
        assert_eq!(D_LEN[31], 3);
        assert_eq!(D_LEN[32], 4);
        assert_eq!(D_LEN[255], 8);
    }

    #[test]
    fn test_literals() {
        let text = b"bip01_pelvis";
        let tokens: Vec<Token> = text.iter().map(|&b| Token::Literal(b)).collect();
        let compressed = encode_tokens(&tokens);
        assert_eq!(decompress(&compressed, text.len()).unwrap(), text.to_vec());
    }

    #[test]
    fn test_back_reference() {
        let tokens = [
            Token::Literal(b'a'),
            Token::Literal(b'b'),
            Token::Literal(b'c'),
            Token::Match {
                distance: 2,
                length: 6,
            },
            Token::Literal(b'!'),
        ];
        let compressed = encode_tokens(&tokens);
        assert_eq!(
            decompress(&compressed, 10).unwrap(),
            b"abcabcabc!".to_vec()
        );
    }

    #[test]
    fn test_window_prefill() {
        // A match before any literal copies from the space-filled window
        let tokens = [Token::Match {
            distance: 100,
            length: 3,
        }];
        let compressed = encode_tokens(&tokens);
        assert_eq!(decompress(&compressed, 3).unwrap(), b"   ".to_vec());
    }

    #[test]
    fn test_long_input_triggers_rebuild() {
        // More than MAX_FREQ symbols forces the tree to be reconstructed
        let text: Vec<u8> = (0..40_000u32).map(|i| (i % 7) as u8 + b'a').collect();
        let tokens: Vec<Token> = text.iter().map(|&b| Token::Literal(b)).collect();
        let compressed = encode_tokens(&tokens);
        assert_eq!(decompress(&compressed, text.len()).unwrap(), text);
    }

    #[test]
    fn test_underflow() {
        let tokens: Vec<Token> = b"skeleton".iter().map(|&b| Token::Literal(b)).collect();
        let compressed = encode_tokens(&tokens);
        let err = decompress(&compressed[..2], 8).unwrap_err();
        assert!(matches!(err, DataError::Format(_)));
    }

    #[test]
    fn test_output_is_truncated_to_requested_size() {
        let tokens = [
            Token::Literal(b'x'),
            Token::Match {
                distance: 0,
                length: 10,
            },
        ];
        let compressed = encode_tokens(&tokens);
        assert_eq!(decompress(&compressed, 4).unwrap(), b"xxxx".to_vec());
    }
}
