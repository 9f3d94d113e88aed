// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use recordkv::{Error, Handle, Mode, PanicSink};

pub fn create_empty(idx_len: u64, dat_len: u64) {
    assert_eq!(idx_len, 7 * 138 + 1);
    assert_eq!(dat_len, 0);
}

pub fn insert_one(h: &mut Handle<PanicSink>) {
    h.store(b"Alpha", b"one", Mode::Insert).unwrap();
    assert_eq!(h.fetch(b"Alpha").unwrap().as_deref(), Some(&b"one"[..]));
    h.rewind();
    assert_eq!(
        h.next().unwrap(),
        Some((b"Alpha".to_vec(), b"one".to_vec()))
    );
    assert_eq!(h.next().unwrap(), None);
}

pub fn replace_same_length(h: &mut Handle<PanicSink>, dat_len_before: u64, dat_len_after: u64) {
    assert_eq!(dat_len_before, dat_len_after);
    assert_eq!(h.fetch(b"k").unwrap().as_deref(), Some(&b"wxyz"[..]));
}

pub fn replace_differing_length(
    h: &mut Handle<PanicSink>,
    dat_path: &std::path::Path,
    old_datoff: u64,
    old_datlen: u64,
) {
    assert_eq!(h.fetch(b"k").unwrap().as_deref(), Some(&b"abcdef"[..]));

    // spec.md §8 scenario 5: the old data record is blanked, not removed —
    // its bytes become all spaces plus the trailing newline.
    use std::os::unix::fs::FileExt;
    let mut buf = vec![0u8; old_datlen as usize];
    let f = std::fs::File::open(dat_path).unwrap();
    f.read_exact_at(&mut buf, old_datoff).unwrap();
    let mut expected = vec![b' '; (old_datlen - 1) as usize];
    expected.push(b'\n');
    assert_eq!(buf, expected);
}

pub fn delete_then_reuse(h: &mut Handle<PanicSink>, idx_len_before: u64, idx_len_after: u64) {
    assert_eq!(idx_len_before, idx_len_after);
    assert!(h.fetch(b"k1").unwrap().is_none());
    assert_eq!(h.fetch(b"k2").unwrap().as_deref(), Some(&b"ww"[..]));
}

pub fn insert_duplicate_rejects(h: &mut Handle<PanicSink>) {
    h.store(b"dup", b"v1", Mode::Insert).unwrap();
    let err = h.store(b"dup", b"v2", Mode::Insert).unwrap_err();
    assert!(matches!(err, Error::KeyExists));
    assert_eq!(h.fetch(b"dup").unwrap().as_deref(), Some(&b"v1"[..]));
}
