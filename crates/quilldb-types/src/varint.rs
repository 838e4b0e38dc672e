//! LEB128-style variable-length integer codec used for B+Tree cell headers
//! (key length, value length, overflow page count) per §3.

use smallvec::SmallVec;

/// Largest number of bytes a `u64` can ever expand to under this encoding.
pub const MAX_VARINT_LEN: usize = 10;

/// Encodes `value` and appends the bytes to `out`, returning the number of
/// bytes written. Uses a `SmallVec` stack buffer so callers writing into a
/// page don't need a heap allocation per cell header field.
pub fn encode_varint_into(value: u64, out: &mut Vec<u8>) -> usize {
    let mut buf: SmallVec<[u8; MAX_VARINT_LEN]> = SmallVec::new();
    let mut v = value;
    loop {
        let mut byte = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if v == 0 {
            break;
        }
    }
    out.extend_from_slice(&buf);
    buf.len()
}

/// Decodes a varint from the front of `bytes`, returning the value and the
/// number of bytes consumed. Returns `None` if `bytes` ends before a
/// continuation chain terminates, or the chain runs past `MAX_VARINT_LEN`.
#[must_use]
pub fn decode_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, &byte) in bytes.iter().enumerate().take(MAX_VARINT_LEN) {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}
