//! Modified UTF-8 codec.
//!
//! NUL is written as the two-byte sequence `C0 80` and supplementary code
//! points are written as a UTF-16 surrogate pair, each half in three bytes.
//! Unpaired surrogates decode to U+FFFD.

use crate::error::{CodecError, Result};

/// Number of bytes `encode` produces for `s`
pub fn encoded_len(s: &str) -> usize {
    s.chars()
        .map(|c| match c as u32 {
            0 => 2,
            1..=0x7F => 1,
            0x80..=0x7FF => 2,
            0x800..=0xFFFF => 3,
            _ => 6,
        })
        .sum()
}

/// Append the modified UTF-8 form of `s` to `out`
pub fn encode_into(s: &str, out: &mut Vec<u8>) {
    out.reserve(encoded_len(s));
    let mut units = [0u16; 2];
    for c in s.chars() {
        for &unit in c.encode_utf16(&mut units).iter() {
            push_unit(unit, out);
        }
    }
}

/// Modified UTF-8 form of `s`
pub fn encode(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(s));
    encode_into(s, &mut out);
    out
}

#[inline]
fn push_unit(unit: u16, out: &mut Vec<u8>) {
    match unit {
        0x0001..=0x007F => out.push(unit as u8),
        0x0000 | 0x0080..=0x07FF => {
            out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
            out.push(0x80 | (unit & 0x3F) as u8);
        }
        _ => {
            out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
            out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
            out.push(0x80 | (unit & 0x3F) as u8);
        }
    }
}

/// Decode modified UTF-8 bytes
pub fn decode(bytes: &[u8]) -> Result<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i];
        match b0 >> 4 {
            0x0..=0x7 => {
                units.push(u16::from(b0));
                i += 1;
            }
            0xC | 0xD => {
                let b1 = continuation(bytes, i + 1)?;
                units.push((u16::from(b0 & 0x1F) << 6) | u16::from(b1 & 0x3F));
                i += 2;
            }
            0xE => {
                let b1 = continuation(bytes, i + 1)?;
                let b2 = continuation(bytes, i + 2)?;
                units.push(
                    (u16::from(b0 & 0x0F) << 12)
                        | (u16::from(b1 & 0x3F) << 6)
                        | u16::from(b2 & 0x3F),
                );
                i += 3;
            }
            _ => {
                return Err(CodecError::StreamFraming(format!(
                    "malformed modified UTF-8 lead byte {b0:#04x} at offset {i}"
                )))
            }
        }
    }
    Ok(char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect())
}

#[inline]
fn continuation(bytes: &[u8], at: usize) -> Result<u8> {
    match bytes.get(at) {
        Some(&b) if b & 0xC0 == 0x80 => Ok(b),
        Some(&b) => Err(CodecError::StreamFraming(format!(
            "malformed modified UTF-8 continuation byte {b:#04x} at offset {at}"
        ))),
        None => Err(CodecError::StreamFraming(
            "truncated modified UTF-8 sequence".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_ascii_passthrough() {
        assert_eq!(encode("hello"), b"hello");
        assert_eq!(decode(b"hello").unwrap(), "hello");
    }

    #[test]
    fn test_nul_uses_two_bytes() {
        assert_eq!(encode("a\0b"), vec![b'a', 0xC0, 0x80, b'b']);
        assert_eq!(encoded_len("\0"), 2);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_supplementary_as_surrogate_pair() {
        let s = "\u{1F600}";
        let bytes = encode(s);
        assert_eq!(bytes.len(), 6);
        assert_eq!(encoded_len(s), 6);
        assert_eq!(decode(&bytes).unwrap(), s);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_unpaired_surrogate_is_replaced() {
        // U+D800 on its own
        let bytes = [0xED, 0xA0, 0x80];
        assert_eq!(decode(&bytes).unwrap(), "\u{FFFD}");
    }

    #[test]
    fn test_malformed_input_rejected() {
        assert!(decode(&[0xC3]).is_err());
        assert!(decode(&[0xE2, 0x82]).is_err());
        assert!(decode(&[0xF0, 0x9F, 0x98, 0x80]).is_err());
        assert!(decode(&[0xC3, 0x41]).is_err());
    }
}
