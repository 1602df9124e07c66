//! QPACK prefixed integers and string literals (RFC 9204 Section 4.1).
//!
//! An integer is packed into the low N bits of the first byte; if it does
//! not fit, the rest follows as 7-bit continuation groups, least
//! significant first. This is unrelated to the QUIC variable-length
//! integer format.
//!
//! A string literal is an H flag at bit `prefix_bits` of the first byte,
//! a prefixed length, then the raw or Huffman-coded bytes.

use super::{huffman, QpackError};

/// Append `value` with an N-bit prefix. `flags` holds the bits above the
/// prefix in the first byte.
pub fn encode_integer(value: u64, prefix_bits: u8, flags: u8, out: &mut Vec<u8>) {
    debug_assert!((1..=8).contains(&prefix_bits));
    let max_prefix = (1u64 << prefix_bits) - 1;

    if value < max_prefix {
        out.push(flags | value as u8);
        return;
    }

    out.push(flags | max_prefix as u8);
    let mut remaining = value - max_prefix;
    while remaining >= 128 {
        out.push(0x80 | (remaining & 0x7f) as u8);
        remaining >>= 7;
    }
    out.push(remaining as u8);
}

/// Decode an integer with an N-bit prefix. Returns `(value, consumed)`.
///
/// `Truncated` means more input is needed; a value past `u64::MAX` is an
/// `IntegerOverflow`.
pub fn decode_integer(buf: &[u8], prefix_bits: u8) -> Result<(u64, usize), QpackError> {
    debug_assert!((1..=8).contains(&prefix_bits));
    let first = *buf.first().ok_or(QpackError::Truncated)?;
    let max_prefix = (1u64 << prefix_bits) - 1;
    let mut value = u64::from(first) & max_prefix;
    if value < max_prefix {
        return Ok((value, 1));
    }

    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate().skip(1) {
        let group = u64::from(byte & 0x7f);
        if shift > 63 || (shift > 0 && group >> (64 - shift) != 0) {
            return Err(QpackError::IntegerOverflow);
        }
        value = value
            .checked_add(group << shift)
            .ok_or(QpackError::IntegerOverflow)?;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }
    Err(QpackError::Truncated)
}

/// Append a string literal. Huffman coding is used when it is shorter.
pub fn encode_string(data: &[u8], prefix_bits: u8, flags: u8, out: &mut Vec<u8>) {
    let huff_len = huffman::encoded_len(data);
    if huff_len < data.len() {
        encode_integer(huff_len as u64, prefix_bits, flags | (1 << prefix_bits), out);
        huffman::encode(data, out);
    } else {
        encode_integer(data.len() as u64, prefix_bits, flags, out);
        out.extend_from_slice(data);
    }
}

/// Decode a string literal whose H flag sits just above an N-bit length
/// prefix. Returns `(bytes, consumed)`.
pub fn decode_string(buf: &[u8], prefix_bits: u8) -> Result<(Vec<u8>, usize), QpackError> {
    let first = *buf.first().ok_or(QpackError::Truncated)?;
    let huffman_coded = first & (1 << prefix_bits) != 0;
    let (len, consumed) = decode_integer(buf, prefix_bits)?;
    let end = usize::try_from(len)
        .ok()
        .and_then(|len| consumed.checked_add(len))
        .ok_or(QpackError::IntegerOverflow)?;
    let raw = buf.get(consumed..end).ok_or(QpackError::Truncated)?;
    let bytes = if huffman_coded {
        huffman::decode(raw)?
    } else {
        raw.to_vec()
    };
    Ok((bytes, end))
}
