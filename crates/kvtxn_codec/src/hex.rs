//! Fixed-width hex encoding of byte strings.
//!
//! Every byte becomes exactly two uppercase hex digits, so the encoded length
//! is always twice the input length and decoding needs no separators.

use crate::error::{CodecError, CodecResult};

const DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Encode bytes as uppercase hex.
pub fn encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(char::from(DIGITS[usize::from(b >> 4)]));
        out.push(char::from(DIGITS[usize::from(b & 0x0f)]));
    }
    out
}

/// Decode a hex string (either case) into bytes.
///
/// # Errors
///
/// Returns [`CodecError::OddHexLength`] for odd-length input and
/// [`CodecError::InvalidHexChar`] for characters outside `[0-9a-fA-F]`.
pub fn decode(text: &str) -> CodecResult<Vec<u8>> {
    let raw = text.as_bytes();
    if raw.len() % 2 != 0 {
        return Err(CodecError::OddHexLength { len: raw.len() });
    }

    raw.chunks_exact(2)
        .enumerate()
        .map(|(i, pair)| {
            let hi = nibble(pair[0], i * 2)?;
            let lo = nibble(pair[1], i * 2 + 1)?;
            Ok((hi << 4) | lo)
        })
        .collect()
}

fn nibble(c: u8, position: usize) -> CodecResult<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(CodecError::InvalidHexChar {
            found: char::from(c),
            position,
        }),
    }
}
