//! ISO-8859-1 conversions
//!
//! 2DA and TLK files are single-byte encoded. Every byte maps to the char
//! with the same code point, so decoding never fails; encoding fails on
//! anything above U+00FF.

use crate::error::{Error, Result};

/// Decode ISO-8859-1 bytes
pub fn decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Encode text as ISO-8859-1, naming `context` in the error
pub fn encode(text: &str, context: &str) -> Result<Vec<u8>> {
    text.chars()
        .map(|ch| {
            u8::try_from(u32::from(ch)).map_err(|_| Error::Unencodable {
                context: context.to_string(),
                ch,
            })
        })
        .collect()
}

/// Check that text is encodable without allocating the output
pub fn check(text: &str, context: &str) -> Result<()> {
    match text.chars().find(|&ch| u32::from(ch) > 0xFF) {
        Some(ch) => Err(Error::Unencodable {
            context: context.to_string(),
            ch,
        }),
        None => Ok(()),
    }
}
