//! Windows-1251 text encoding
//!
//! Every string stored in engine containers uses the Windows-1251 (Cyrillic)
//! code page. The lower half is plain ASCII; the upper half is mapped through
//! [`HIGH_HALF`].

use crate::error::{DataError, Result};

/// Code points for bytes `0x80..=0xFF`.
///
/// `0x98` is unassigned in the code page and maps to the C1 control `U+0098`
/// so that decoding stays total and re-encoding is lossless.
const HIGH_HALF: [char; 128] = [
    // 0x80
    '\u{0402}', '\u{0403}', '\u{201A}', '\u{0453}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{20AC}', '\u{2030}', '\u{0409}', '\u{2039}', '\u{040A}', '\u{040C}', '\u{040B}', '\u{040F}',
    // 0x90
    '\u{0452}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{0098}', '\u{2122}', '\u{0459}', '\u{203A}', '\u{045A}', '\u{045C}', '\u{045B}', '\u{045F}',
    // 0xA0
    '\u{00A0}', '\u{040E}', '\u{045E}', '\u{0408}', '\u{00A4}', '\u{0490}', '\u{00A6}', '\u{00A7}',
    '\u{0401}', '\u{00A9}', '\u{0404}', '\u{00AB}', '\u{00AC}', '\u{00AD}', '\u{00AE}', '\u{0407}',
    // 0xB0
    '\u{00B0}', '\u{00B1}', '\u{0406}', '\u{0456}', '\u{0491}', '\u{00B5}', '\u{00B6}', '\u{00B7}',
    '\u{0451}', '\u{2116}', '\u{0454}', '\u{00BB}', '\u{0458}', '\u{0405}', '\u{0455}', '\u{0457}',
    // 0xC0
    '\u{0410}', '\u{0411}', '\u{0412}', '\u{0413}', '\u{0414}', '\u{0415}', '\u{0416}', '\u{0417}',
    '\u{0418}', '\u{0419}', '\u{041A}', '\u{041B}', '\u{041C}', '\u{041D}', '\u{041E}', '\u{041F}',
    // 0xD0
    '\u{0420}', '\u{0421}', '\u{0422}', '\u{0423}', '\u{0424}', '\u{0425}', '\u{0426}', '\u{0427}',
    '\u{0428}', '\u{0429}', '\u{042A}', '\u{042B}', '\u{042C}', '\u{042D}', '\u{042E}', '\u{042F}',
    // 0xE0
    '\u{0430}', '\u{0431}', '\u{0432}', '\u{0433}', '\u{0434}', '\u{0435}', '\u{0436}', '\u{0437}',
    '\u{0438}', '\u{0439}', '\u{043A}', '\u{043B}', '\u{043C}', '\u{043D}', '\u{043E}', '\u{043F}',
    // 0xF0
    '\u{0440}', '\u{0441}', '\u{0442}', '\u{0443}', '\u{0444}', '\u{0445}', '\u{0446}', '\u{0447}',
    '\u{0448}', '\u{0449}', '\u{044A}', '\u{044B}', '\u{044C}', '\u{044D}', '\u{044E}', '\u{044F}',
];

/// Decode a Windows-1251 byte string
pub fn decode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b < 0x80 {
                char::from(b)
            } else {
                HIGH_HALF[(b - 0x80) as usize]
            }
        })
        .collect()
}

/// Encode a string as Windows-1251
///
/// Fails with [`DataError::Format`] when a character has no representation in
/// the code page.
pub fn encode(text: &str) -> Result<Vec<u8>> {
    text.chars()
        .map(|c| {
            if c.is_ascii() {
                return Ok(c as u8);
            }
            // Cyrillic capital А..я is contiguous at 0xC0..0xFF
            if ('\u{0410}'..='\u{044F}').contains(&c) {
                return Ok((c as u32 - 0x0410 + 0xC0) as u8);
            }
            HIGH_HALF
                .iter()
                .position(|&mapped| mapped == c)
                .map(|index| index as u8 + 0x80)
                .ok_or_else(|| {
                    DataError::format(format!(
                        "character {c:?} in {text:?} is not representable in Windows-1251"
                    ))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ascii_passthrough() {
        assert_eq!(decode(b"bip01_spine"), "bip01_spine");
        assert_eq!(encode("bip01_spine").unwrap(), b"bip01_spine".to_vec());
    }

    #[test]
    fn test_cyrillic() {
        let bytes = [0xEF, 0xF0, 0xE8, 0xE2, 0xE5, 0xF2];
        assert_eq!(decode(&bytes), "привет");
        assert_eq!(encode("привет").unwrap(), bytes.to_vec());
    }

    #[test]
    fn test_every_byte_survives() {
        let all: Vec<u8> = (0..=255).collect();
        assert_eq!(encode(&decode(&all)).unwrap(), all);
    }

    #[test]
    fn test_unrepresentable_character() {
        assert!(encode("日本").is_err());
    }
}
