// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

// File Record I/O: reads and writes the three physical record shapes
// (pointer field, index record, data record) at given file offsets, using
// positional I/O so no operation disturbs another's notion of "current
// position" — there is no shared seek cursor to race between concurrent
// readers of the same fd. `Handle`'s own cursor state (for `next`) is
// plain data, not the file's seek position.

use crate::codec::{self, IDXLEN_MAX, IDXLEN_MIN, NEWLINE, SEP};
use crate::error::Error;
use std::fs::File;
use std::os::unix::fs::FileExt;

/// Where a record-append operation lands.
#[derive(Debug, Clone, Copy)]
pub enum Whence {
    /// Write at this exact offset (in-place overwrite of a reused slot).
    Set(u64),
    /// Append at the current end of file. Callers are expected to already
    /// hold the whole-region append lock for the duration (spec.md §5).
    End,
}

/// Read a [`codec::PTR_SZ`]-byte pointer field at `offset`.
pub fn read_ptr(file: &File, offset: u64) -> Result<u64, Error> {
    let mut buf = [0u8; codec::PTR_SZ];
    file.read_exact_at(&mut buf, offset)
        .map_err(|e| short_read_to_corrupt(e, "pointer field"))?;
    codec::decode_ptr(&buf)
}

/// Write a [`codec::PTR_SZ`]-byte pointer field at `offset`.
pub fn write_ptr(file: &File, offset: u64, ptr: u64) -> Result<(), Error> {
    let buf = codec::encode_ptr(ptr)?;
    file.write_all_at(&buf, offset)?;
    Ok(())
}

/// A fully decoded index record: successor pointer, key, and the data
/// record it points to.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub idxoff: u64,
    /// Byte length of the body region (`key:datoff:datlen\n`), including
    /// the trailing newline. This is what the fixed length header stores.
    pub idxlen: u64,
    pub next: u64,
    pub key: Vec<u8>,
    pub datoff: u64,
    pub datlen: u64,
}

/// The header-plus-raw-body of an index record, before the body is known
/// to parse as `key:datoff:datlen\n` rather than a blanked, freed slot.
struct RawIndexRecord {
    idxoff: u64,
    idxlen: u64,
    next: u64,
    /// Body bytes including the trailing newline, excluding the header.
    body: Vec<u8>,
}

fn short_read_to_corrupt(err: std::io::Error, what: &str) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::Corrupt(format!("short read of {what}"))
    } else {
        Error::Io(err)
    }
}

fn read_raw(file: &File, offset: u64) -> Result<RawIndexRecord, Error> {
    let mut header = [0u8; codec::PTR_SZ + codec::IDXLEN_SZ];
    file.read_exact_at(&mut header, offset)
        .map_err(|e| short_read_to_corrupt(e, "index record header"))?;
    let next = codec::decode_ptr(&header[..codec::PTR_SZ])?;
    let idxlen = codec::decode_len(&header[codec::PTR_SZ..])?;
    if idxlen == 0 {
        return Err(Error::Corrupt("zero-length index body".into()));
    }

    let mut body = vec![0u8; idxlen as usize];
    file.read_exact_at(&mut body, offset + header.len() as u64)
        .map_err(|e| short_read_to_corrupt(e, "index body"))?;
    if body[body.len() - 1] != NEWLINE {
        return Err(Error::Corrupt("index body missing trailing newline".into()));
    }

    Ok(RawIndexRecord {
        idxoff: offset,
        idxlen,
        next,
        body,
    })
}

/// Whether a parsed key marks a blanked, freed slot: deleting a record
/// overwrites only its key bytes with spaces (see [`blank_index_body`]),
/// leaving the `:datoff:datlen\n` suffix intact so a later `find_free`
/// can still recover the freed slot's data offset and length well enough
/// to reuse it in place (spec.md §4.3.4, §4.4.6). A live key is never
/// entirely spaces in practice, so this is how both `next()`'s sequential
/// scan and chain walks tell a freed slot from a live one.
fn is_blank_key(key: &[u8]) -> bool {
    !key.is_empty() && key.iter().all(|&b| b == codec::SPACE)
}

fn parse_body(idxoff: u64, body: &[u8]) -> Result<(Vec<u8>, u64, u64), Error> {
    let without_newline = &body[..body.len() - 1];
    let first_sep = without_newline
        .iter()
        .position(|&b| b == SEP)
        .ok_or_else(|| Error::Corrupt(format!("index record at {idxoff}: missing first separator")))?;
    let rest = &without_newline[first_sep + 1..];
    let second_sep = rest.iter().position(|&b| b == SEP).ok_or_else(|| {
        Error::Corrupt(format!("index record at {idxoff}: missing second separator"))
    })?;

    let key = without_newline[..first_sep].to_vec();
    let datoff_bytes = &rest[..second_sep];
    let datlen_bytes = &rest[second_sep + 1..];

    let parse_int = |bytes: &[u8], what: &str| -> Result<u64, Error> {
        std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| Error::Corrupt(format!("index record at {idxoff}: unparseable {what}")))
    };
    let datoff = parse_int(datoff_bytes, "data offset")?;
    let datlen = parse_int(datlen_bytes, "data length")?;
    Ok((key, datoff, datlen))
}

/// Read the index record at `offset` and parse its body. Fails with
/// [`Error::Corrupt`] if the slot is blank (freed) — callers walking a
/// live chain should never land on one; `next()`'s sequential scan uses
/// [`read_idx_raw`] instead, which does not make that assumption.
pub fn read_idx(file: &File, offset: u64) -> Result<IndexRecord, Error> {
    let raw = read_raw(file, offset)?;
    let (key, datoff, datlen) = parse_body(offset, &raw.body)?;
    if is_blank_key(&key) {
        return Err(Error::Corrupt(format!(
            "index record at {offset}: chain references a freed slot"
        )));
    }
    Ok(IndexRecord {
        idxoff: raw.idxoff,
        idxlen: raw.idxlen,
        next: raw.next,
        key,
        datoff,
        datlen,
    })
}

/// Outcome of a raw sequential read, used by `next()`'s full-file walk and
/// by `find_free`'s free-list walk, both of which must tell a live record
/// from a freed (blanked) one rather than treat the latter as corruption.
pub enum ScannedRecord {
    Live(IndexRecord),
    /// `keylen` is the original key's byte length, still recoverable
    /// because only the key bytes themselves were blanked.
    Free {
        idxoff: u64,
        idxlen: u64,
        keylen: u64,
        datoff: u64,
        datlen: u64,
    },
}

/// Read the index record at `offset` without assuming it is live.
pub fn read_idx_raw(file: &File, offset: u64) -> Result<ScannedRecord, Error> {
    let raw = read_raw(file, offset)?;
    let (key, datoff, datlen) = parse_body(offset, &raw.body)?;
    if is_blank_key(&key) {
        return Ok(ScannedRecord::Free {
            idxoff: raw.idxoff,
            idxlen: raw.idxlen,
            keylen: key.len() as u64,
            datoff,
            datlen,
        });
    }
    Ok(ScannedRecord::Live(IndexRecord {
        idxoff: raw.idxoff,
        idxlen: raw.idxlen,
        next: raw.next,
        key,
        datoff,
        datlen,
    }))
}

/// Total on-disk size of an index record: header plus body.
pub fn idx_record_size(idxlen: u64) -> u64 {
    (codec::PTR_SZ + codec::IDXLEN_SZ) as u64 + idxlen
}

/// Format and write an index record (header + body) at `whence`. Returns
/// the offset the record was written at and the body length.
pub fn write_idx(
    file: &File,
    key: &[u8],
    datoff: u64,
    datlen: u64,
    next: u64,
    whence: Whence,
) -> Result<(u64, u64), Error> {
    if key.iter().any(|&b| b == SEP || b == NEWLINE) {
        return Err(Error::Corrupt("key contains ':' or newline".into()));
    }

    let mut body = Vec::with_capacity(key.len() + 16);
    body.extend_from_slice(key);
    body.push(SEP);
    body.extend_from_slice(datoff.to_string().as_bytes());
    body.push(SEP);
    body.extend_from_slice(datlen.to_string().as_bytes());
    body.push(NEWLINE);

    let idxlen = body.len() as u64;
    if !(IDXLEN_MIN..=IDXLEN_MAX).contains(&idxlen) {
        return Err(Error::ValueTooLarge);
    }

    let header_next = codec::encode_ptr(next)?;
    let header_len = codec::encode_len(idxlen)?;

    let offset = match whence {
        Whence::Set(offset) => offset,
        Whence::End => file.metadata()?.len(),
    };

    // Scatter the fixed header and the body as one logical record; two
    // positional writes rather than a single `writev` since `FileExt`
    // has no vectored positional write, but both land before any other
    // operation can observe this offset because the caller holds the
    // relevant region lock for the duration.
    file.write_all_at(&header_next, offset)?;
    file.write_all_at(&header_len, offset + codec::PTR_SZ as u64)?;
    file.write_all_at(&body, offset + (codec::PTR_SZ + codec::IDXLEN_SZ) as u64)?;

    Ok((offset, idxlen))
}

/// Overwrite an index record's key with spaces, preserving the rest of
/// the body (`:datoff:datlen\n`) and the whole header (spec.md invariant
/// 7: "preserving length and newline"). Leaving `datoff`/`datlen`
/// readable is what lets [`read_idx_raw`] recover a freed slot's data
/// location for [`crate::list::find_free`] to reuse.
pub fn blank_index_body(file: &File, idxoff: u64, keylen: u64) -> Result<(), Error> {
    if keylen == 0 {
        return Ok(());
    }
    let buf = vec![codec::SPACE; keylen as usize];
    file.write_all_at(&buf, idxoff + (codec::PTR_SZ + codec::IDXLEN_SZ) as u64)?;
    Ok(())
}

/// Read `datlen` bytes at `datoff` from the data file and strip the
/// trailing newline, returning the value bytes.
pub fn read_dat(file: &File, datoff: u64, datlen: u64) -> Result<Vec<u8>, Error> {
    if datlen == 0 {
        return Err(Error::Corrupt("zero-length data record".into()));
    }
    let mut buf = vec![0u8; datlen as usize];
    file.read_exact_at(&mut buf, datoff)
        .map_err(|e| short_read_to_corrupt(e, "data record"))?;
    if buf[buf.len() - 1] != NEWLINE {
        return Err(Error::Corrupt("data record missing trailing newline".into()));
    }
    buf.pop();
    Ok(buf)
}

/// Write `value` plus a trailing newline at `whence`. Returns the offset
/// written at and the on-disk length (`value.len() + 1`).
pub fn write_dat(file: &File, value: &[u8], whence: Whence) -> Result<(u64, u64), Error> {
    let offset = match whence {
        Whence::Set(offset) => offset,
        Whence::End => file.metadata()?.len(),
    };
    let mut record = Vec::with_capacity(value.len() + 1);
    record.extend_from_slice(value);
    record.push(NEWLINE);
    file.write_all_at(&record, offset)?;
    Ok((offset, record.len() as u64))
}

/// Overwrite a data record's value bytes with spaces, preserving the
/// trailing newline.
pub fn blank_data_record(file: &File, datoff: u64, datlen: u64) -> Result<(), Error> {
    if datlen == 0 {
        return Ok(());
    }
    let buf = vec![codec::SPACE; (datlen - 1) as usize];
    file.write_all_at(&buf, datoff)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempfile;

    #[test]
    fn ptr_field_round_trip() {
        let f = tempfile().unwrap();
        f.set_len(16).unwrap();
        write_ptr(&f, 0, 42).unwrap();
        assert_eq!(read_ptr(&f, 0).unwrap(), 42);
    }

    #[test]
    fn idx_record_round_trip() {
        let f = tempfile().unwrap();
        let (offset, idxlen) = write_idx(&f, b"Alpha", 10, 4, 0, Whence::Set(0)).unwrap();
        let rec = read_idx(&f, offset).unwrap();
        assert_eq!(rec.key, b"Alpha");
        assert_eq!(rec.datoff, 10);
        assert_eq!(rec.datlen, 4);
        assert_eq!(rec.next, 0);
        assert_eq!(rec.idxlen, idxlen);
    }

    #[test]
    fn idx_append_then_blank_is_detected_as_free() {
        let f = tempfile().unwrap();
        let (offset, _idxlen) = write_idx(&f, b"k", 12, 5, 0, Whence::End).unwrap();
        blank_index_body(&f, offset, 1).unwrap();
        match read_idx_raw(&f, offset).unwrap() {
            ScannedRecord::Free {
                idxoff,
                keylen,
                datoff,
                datlen,
                ..
            } => {
                assert_eq!(idxoff, offset);
                assert_eq!(keylen, 1);
                assert_eq!(datoff, 12);
                assert_eq!(datlen, 5);
            }
            ScannedRecord::Live(_) => panic!("expected a freed slot"),
        }
    }

    #[test]
    fn dat_record_round_trip() {
        let f = tempfile().unwrap();
        let (offset, datlen) = write_dat(&f, b"hello", Whence::Set(0)).unwrap();
        assert_eq!(datlen, 6);
        assert_eq!(read_dat(&f, offset, datlen).unwrap(), b"hello");
    }

    #[test]
    fn dat_blank_preserves_newline() {
        let f = tempfile().unwrap();
        let (offset, datlen) = write_dat(&f, b"abcd", Whence::Set(0)).unwrap();
        blank_data_record(&f, offset, datlen).unwrap();
        let mut buf = vec![0u8; datlen as usize];
        f.read_exact_at(&mut buf, offset).unwrap();
        assert_eq!(buf, b"    \n");
    }

    #[test]
    fn rejects_key_with_separator() {
        let f = tempfile().unwrap();
        assert!(write_idx(&f, b"a:b", 0, 1, 0, Whence::Set(0)).is_err());
    }
}
