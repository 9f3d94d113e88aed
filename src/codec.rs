// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

// Fixed-width ASCII codec: the serialization primitive every other layer
// builds on. Every numeric field on disk is decimal ASCII, right-justified
// and space-padded to a fixed width, so the format is endian-agnostic
// (spec.md §6) and the index file stays a pure byte stream with no binary
// integer encoding to get wrong across platforms.

use crate::error::Error;

/// Width in bytes of a pointer field (a file offset). `0` is the null
/// pointer; `PTR_MAX` is the largest representable offset.
pub const PTR_SZ: usize = 7;
/// Largest value a [`PTR_SZ`]-byte field can hold: `10^PTR_SZ - 1`.
pub const PTR_MAX: u64 = 9_999_999;

/// Width in bytes of an index record's length field.
pub const IDXLEN_SZ: usize = 4;

/// Smallest/largest permitted index body length (`key:datoff:datlen\n`).
/// The minimum is a 1-byte key, a 1-digit datoff, a 1-digit datlen, two
/// separators and the trailing newline: `k:0:0\n`-shaped, 6 bytes.
pub const IDXLEN_MIN: u64 = 6;
pub const IDXLEN_MAX: u64 = 1010;

/// Smallest/largest permitted data record length (`value\n`).
pub const DATLEN_MIN: u64 = 2;
pub const DATLEN_MAX: u64 = 1024;

/// Separator between the key, data offset, and data length within an
/// index body.
pub const SEP: u8 = b':';
/// Terminates every index body and every data record.
pub const NEWLINE: u8 = b'\n';
/// Pad byte for fixed-width fields, and the byte a freed slot is
/// overwritten with (spec.md invariant 7).
pub const SPACE: u8 = b' ';

/// Default hash table size (spec.md §3.2). Fixed once a database is
/// created; stored in [`crate::config::DbConfig`] so a database can be
/// created with a non-default size, but never changed afterward.
pub const NHASH_DEFAULT: u64 = 137;

/// Offset of the free list's head pointer: the first field in the index
/// file, immediately before the `N`-entry hash directory (spec.md §3.2).
pub const FREE_OFF: u64 = 0;

/// Encode `value` as a right-justified, space-padded decimal field of
/// exactly `width` bytes. `width` is [`PTR_SZ`] or [`IDXLEN_SZ`] in
/// practice. Fails if `value` doesn't fit in `width` decimal digits.
fn encode_fixed(value: u64, width: usize) -> Result<Vec<u8>, Error> {
    let digits = value.to_string();
    if digits.len() > width {
        return Err(Error::Corrupt(format!(
            "value {value} does not fit in a {width}-byte field"
        )));
    }
    let mut buf = vec![SPACE; width];
    let start = width - digits.len();
    buf[start..].copy_from_slice(digits.as_bytes());
    Ok(buf)
}

/// Parse exactly `bytes.len()` bytes of decimal ASCII (space-padded on the
/// left), returning the value. Fails on any non-digit, non-space byte, or
/// an all-space field (a `0`-valued field is written as digit `0`, not as
/// blanks — blanks only appear inside a freed, blanked body, never in a
/// pointer/length header).
fn decode_fixed(bytes: &[u8]) -> Result<u64, Error> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| Error::Corrupt("non-UTF8 bytes in fixed-width field".into()))?;
    let trimmed = text.trim_start_matches(' ');
    if trimmed.is_empty() {
        return Err(Error::Corrupt("empty fixed-width field".into()));
    }
    trimmed
        .parse::<u64>()
        .map_err(|_| Error::Corrupt(format!("unparseable fixed-width field: {text:?}")))
}

/// Encode a file offset as a [`PTR_SZ`]-byte field. `0` denotes the null
/// pointer.
pub fn encode_ptr(value: u64) -> Result<[u8; PTR_SZ], Error> {
    if value > PTR_MAX {
        return Err(Error::Corrupt(format!("offset {value} exceeds PTR_MAX")));
    }
    let buf = encode_fixed(value, PTR_SZ)?;
    Ok(buf.try_into().expect("encode_fixed returns PTR_SZ bytes"))
}

/// Decode a [`PTR_SZ`]-byte field back into an offset.
pub fn decode_ptr(bytes: &[u8]) -> Result<u64, Error> {
    debug_assert_eq!(bytes.len(), PTR_SZ);
    let value = decode_fixed(bytes)?;
    if value > PTR_MAX {
        return Err(Error::Corrupt(format!("offset {value} exceeds PTR_MAX")));
    }
    Ok(value)
}

/// Encode an index-body length as an [`IDXLEN_SZ`]-byte field.
pub fn encode_len(value: u64) -> Result<[u8; IDXLEN_SZ], Error> {
    let buf = encode_fixed(value, IDXLEN_SZ)?;
    Ok(buf
        .try_into()
        .expect("encode_fixed returns IDXLEN_SZ bytes"))
}

/// Decode an [`IDXLEN_SZ`]-byte field back into a length.
pub fn decode_len(bytes: &[u8]) -> Result<u64, Error> {
    debug_assert_eq!(bytes.len(), IDXLEN_SZ);
    decode_fixed(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ptr_round_trip() {
        for v in [0, 1, 42, PTR_MAX] {
            let encoded = encode_ptr(v).unwrap();
            assert_eq!(encoded.len(), PTR_SZ);
            assert_eq!(decode_ptr(&encoded).unwrap(), v);
        }
    }

    #[test]
    fn len_round_trip() {
        for v in [0, 1, 9999] {
            let encoded = encode_len(v).unwrap();
            assert_eq!(decode_len(&encoded).unwrap(), v);
        }
    }

    #[test]
    fn ptr_overflow_rejected() {
        assert!(encode_ptr(PTR_MAX + 1).is_err());
    }

    #[test]
    fn len_overflow_rejected() {
        assert!(encode_len(10_000).is_err());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_ptr(b"ab12cde").is_err());
        assert!(decode_ptr(b"       ").is_err());
    }

    #[test]
    fn encode_is_right_justified_space_padded() {
        assert_eq!(&encode_ptr(42).unwrap(), b"     42");
        assert_eq!(&encode_len(7).unwrap(), b"   7");
    }

    #[quickcheck_macros::quickcheck]
    fn ptr_round_trip_qc(v: u64) -> bool {
        let v = v % (PTR_MAX + 1);
        decode_ptr(&encode_ptr(v).unwrap()).unwrap() == v
    }
}
