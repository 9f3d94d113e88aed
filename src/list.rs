// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

// Free-List & Hash Chain Manager: the two singly linked intrusive lists
// threaded through the index file (spec.md §4.3). Operates on an index
// file that the caller has already locked appropriately (spec.md §5); this
// module has no locking of its own beyond the free-list's internal lock in
// `find_free`, which spec.md §4.3.4 calls out as a self-contained critical
// section.

use crate::codec::{self, FREE_OFF};
use crate::error::Error;
use crate::io::{self, IndexRecord, ScannedRecord, Whence};
use crate::lock::{self, LockMode};
use std::fs::File;

/// Weighted 1-based byte sum mod `nhash` (spec.md §4.3.1). This is the
/// sole hashing rule and is part of the on-disk format — changing it
/// would scatter every existing database's records to the wrong buckets.
pub fn hash(key: &[u8], nhash: u64) -> u64 {
    let mut acc: u64 = 0;
    for (i, &byte) in key.iter().enumerate() {
        acc = acc.wrapping_add(byte as u64 * (i as u64 + 1));
    }
    acc % nhash
}

/// Offset of bucket `h`'s head pointer within the hash directory.
pub fn bucket_offset(h: u64) -> u64 {
    codec::PTR_SZ as u64 + h * codec::PTR_SZ as u64
}

/// Result of walking a hash chain looking for `key`.
pub struct ChainSearch {
    pub found: Option<IndexRecord>,
    /// Offset of the pointer field that references the found record (or,
    /// on a miss, the trailing null at chain end): the bucket head for a
    /// first-in-chain match, a prior record's successor field otherwise.
    pub ptroff: u64,
}

/// Walk the chain rooted at `chainoff` looking for `key`. The caller must
/// already hold the appropriate (read or write) lock on `chainoff`'s first
/// byte (spec.md §4.3.3).
pub fn find_in_chain(file: &File, chainoff: u64, key: &[u8]) -> Result<ChainSearch, Error> {
    let mut ptroff = chainoff;
    let mut offset = io::read_ptr(file, ptroff)?;
    while offset != 0 {
        let record = io::read_idx(file, offset)?;
        if record.key == key {
            return Ok(ChainSearch {
                found: Some(record),
                ptroff,
            });
        }
        ptroff = offset;
        offset = record.next;
    }
    Ok(ChainSearch { found: None, ptroff })
}

/// A free-list slot matching the requested `keylen`/`datlen`, ready to be
/// reused in place.
pub struct FreeSlot {
    pub idxoff: u64,
    pub idxlen: u64,
    pub datoff: u64,
}

/// Find a free-list slot whose original key length and data length match
/// exactly (spec.md §4.3.4), unlinking it from the free list on success.
/// Takes its own write lock on the free-list head for the duration.
pub fn find_free(file: &File, fd: std::os::unix::io::RawFd, keylen: u64, datlen: u64) -> Result<Option<FreeSlot>, Error> {
    let _guard = lock::lock(fd, FREE_OFF as i64, 1, LockMode::Write)?;

    let mut save_off = FREE_OFF;
    let mut offset = io::read_ptr(file, save_off)?;

    while offset != 0 {
        match io::read_idx_raw(file, offset)? {
            ScannedRecord::Free {
                idxoff,
                idxlen,
                keylen: free_keylen,
                datoff,
                datlen: free_datlen,
            } => {
                let next = io::read_ptr(file, idxoff)?;
                if free_keylen == keylen && free_datlen == datlen {
                    io::write_ptr(file, save_off, next)?;
                    return Ok(Some(FreeSlot {
                        idxoff,
                        idxlen,
                        datoff,
                    }));
                }
                save_off = idxoff;
                offset = next;
            }
            ScannedRecord::Live(record) => {
                // The free list should only ever reference freed slots;
                // a live record here means the two lists have crossed.
                return Err(Error::Corrupt(format!(
                    "free list references live record at {}",
                    record.idxoff
                )));
            }
        }
    }
    Ok(None)
}

/// Insert `new_idxoff` at the head of the chain rooted at `chainoff`
/// (spec.md §4.3.5 — the sole insertion policy; chains are unordered).
/// `new_idxoff`'s successor field must already hold the prior chain head
/// (callers write the record with `next` set to that value before calling
/// this, since the header write and the head swing together form one
/// logical insert).
pub fn head_insert(file: &File, chainoff: u64, new_idxoff: u64) -> Result<(), Error> {
    io::write_ptr(file, chainoff, new_idxoff)
}

/// Unlink `target_next` into the predecessor pointer at `ptroff` (spec.md
/// §4.3.6): the bucket head for a first-in-chain node, or a prior
/// record's successor field otherwise.
pub fn unlink(file: &File, ptroff: u64, target_next: u64) -> Result<(), Error> {
    io::write_ptr(file, ptroff, target_next)
}

/// The full delete sequence of spec.md §4.3.7, run under the caller's
/// chain write lock. `record` must have been located by
/// [`find_in_chain`] (so `ptroff` is its predecessor's pointer field and
/// `record.next` is its true successor).
pub fn delete_record(
    idx_file: &File,
    dat_file: &File,
    idx_fd: std::os::unix::io::RawFd,
    ptroff: u64,
    record: &IndexRecord,
) -> Result<(), Error> {
    // Free-list lock nests inside the caller's chain lock (spec.md §5's
    // lock ordering).
    let _free_guard = lock::lock(idx_fd, FREE_OFF as i64, 1, LockMode::Write)?;

    io::blank_data_record(dat_file, record.datoff, record.datlen)?;
    io::blank_index_body(idx_file, record.idxoff, record.key.len() as u64)?;

    let free_head = io::read_ptr(idx_file, FREE_OFF)?;
    io::write_ptr(idx_file, record.idxoff, free_head)?;
    io::write_ptr(idx_file, FREE_OFF, record.idxoff)?;

    unlink(idx_file, ptroff, record.next)?;

    Ok(())
}

/// Write a brand-new index record for `key`/`datoff`/`datlen` at
/// `whence`, threading it onto the chain rooted at `chainoff` as the new
/// head. Returns the offset the record landed at.
pub fn append_and_link(
    file: &File,
    chainoff: u64,
    key: &[u8],
    datoff: u64,
    datlen: u64,
    whence: Whence,
) -> Result<u64, Error> {
    let prev_head = io::read_ptr(file, chainoff)?;
    let (idxoff, _idxlen) = io::write_idx(file, key, datoff, datlen, prev_head, whence)?;
    head_insert(file, chainoff, idxoff)?;
    Ok(idxoff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_weighted_1_based_sum_mod_n() {
        // "ab" -> 'a'*1 + 'b'*2 = 97 + 196 = 293; 293 % 137 = 19
        assert_eq!(hash(b"ab", 137), 293 % 137);
    }

    #[test]
    fn bucket_offset_follows_directory_layout() {
        assert_eq!(bucket_offset(0), codec::PTR_SZ as u64);
        assert_eq!(bucket_offset(1), 2 * codec::PTR_SZ as u64);
    }

    #[quickcheck_macros::quickcheck]
    fn hash_is_deterministic(key: Vec<u8>) -> bool {
        hash(&key, 137) == hash(&key, 137)
    }

    #[quickcheck_macros::quickcheck]
    fn hash_always_in_range(key: Vec<u8>) -> bool {
        hash(&key, 137) < 137
    }
}
