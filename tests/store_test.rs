// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod scenarios;

use recordkv::{DbConfig, Handle, Mode, PanicSink};
use tempfile::tempdir;

fn fresh(dir: &tempfile::TempDir) -> Handle<PanicSink> {
    let config = DbConfig {
        truncate: true,
        ..DbConfig::default()
    };
    Handle::create_with_sink(dir.path().join("t"), &config, PanicSink).unwrap()
}

// Matches the hash rule of spec.md §4.3.1: h(key) = (sum of 1-indexed
// byte*position) mod N. Kept independent of the crate's internal `list`
// module so the test still pins down the externally observable behavior
// if that module is refactored.
fn hash(key: &[u8], nhash: u64) -> u64 {
    let mut acc: u64 = 0;
    for (i, &b) in key.iter().enumerate() {
        acc = acc.wrapping_add(b as u64 * (i as u64 + 1));
    }
    acc % nhash
}

#[test]
fn create_empty() {
    let dir = tempdir().unwrap();
    let _h = fresh(&dir);
    let idx_len = std::fs::metadata(dir.path().join("t.idx")).unwrap().len();
    let dat_len = std::fs::metadata(dir.path().join("t.dat")).unwrap().len();
    scenarios::create_empty(idx_len, dat_len);
}

#[test]
fn insert_one() {
    let dir = tempdir().unwrap();
    let mut h = fresh(&dir);
    scenarios::insert_one(&mut h);
}

#[test]
fn collision_chain() {
    let dir = tempdir().unwrap();
    let mut h = fresh(&dir);

    // Exhaustively search short two-byte ASCII strings for a pair that
    // hashes to the same bucket under the default table size.
    let candidates: Vec<Vec<u8>> = (b'a'..=b'z')
        .flat_map(|a| (b'a'..=b'z').map(move |b| vec![a, b]))
        .collect();
    let mut by_bucket: std::collections::HashMap<u64, Vec<u8>> = std::collections::HashMap::new();
    let (k1, k2) = candidates
        .into_iter()
        .find_map(|k| {
            let bucket = hash(&k, 137);
            if let Some(other) = by_bucket.get(&bucket) {
                Some((other.clone(), k))
            } else {
                by_bucket.insert(bucket, k);
                None
            }
        })
        .expect("two colliding short keys must exist for N=137");

    h.store(&k1, b"v1", Mode::Insert).unwrap();
    h.store(&k2, b"v2", Mode::Insert).unwrap();
    assert_eq!(h.fetch(&k1).unwrap().as_deref(), Some(&b"v1"[..]));
    assert_eq!(h.fetch(&k2).unwrap().as_deref(), Some(&b"v2"[..]));
}

#[test]
fn replace_same_length() {
    let dir = tempdir().unwrap();
    let mut h = fresh(&dir);
    h.store(b"k", b"abcd", Mode::Insert).unwrap();
    let before = std::fs::metadata(dir.path().join("t.dat")).unwrap().len();
    h.store(b"k", b"wxyz", Mode::Replace).unwrap();
    let after = std::fs::metadata(dir.path().join("t.dat")).unwrap().len();
    scenarios::replace_same_length(&mut h, before, after);
}

#[test]
fn replace_differing_length() {
    let dir = tempdir().unwrap();
    let mut h = fresh(&dir);
    h.store(b"k", b"abcd", Mode::Insert).unwrap();
    // First record in a freshly created data file, so its offset and
    // length ("abcd\n") are deterministic.
    let old_datoff = 0u64;
    let old_datlen = 5u64;
    h.store(b"k", b"abcdef", Mode::Replace).unwrap();
    scenarios::replace_differing_length(&mut h, &dir.path().join("t.dat"), old_datoff, old_datlen);
}

#[test]
fn delete_then_reuse() {
    let dir = tempdir().unwrap();
    let mut h = fresh(&dir);
    h.store(b"k1", b"vv", Mode::Insert).unwrap();
    h.delete(b"k1").unwrap();
    let before = std::fs::metadata(dir.path().join("t.idx")).unwrap().len();
    h.store(b"k2", b"ww", Mode::Insert).unwrap();
    let after = std::fs::metadata(dir.path().join("t.idx")).unwrap().len();
    scenarios::delete_then_reuse(&mut h, before, after);
}

#[test]
fn insert_duplicate_rejects() {
    let dir = tempdir().unwrap();
    let mut h = fresh(&dir);
    scenarios::insert_duplicate_rejects(&mut h);
}

#[test]
fn reopen_existing_database_sees_prior_writes() {
    let dir = tempdir().unwrap();
    {
        let mut h = fresh(&dir);
        h.store(b"persisted", b"value", Mode::Insert).unwrap();
    }
    let mut h = Handle::open_existing_with_sink(dir.path().join("t"), 137, true, PanicSink).unwrap();
    assert_eq!(
        h.fetch(b"persisted").unwrap().as_deref(),
        Some(&b"value"[..])
    );
}
