// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

// The host-OS locking primitive spec.md names as an external collaborator
// (§6): `lock(fd, offset, length, mode, blocking=true)`. Implemented here
// as POSIX advisory byte-range record locks via `fcntl`/`F_SETLKW`, since
// the single-byte bucket-head and free-list-head locks this format needs
// (spec.md §5) can't be expressed by a whole-file lock crate.
//
// Every acquisition returns a `LockGuard` that releases on drop (spec.md
// §9: "wrap every lock with a scoped acquisition that guarantees release
// on every exit path including panics or errors"), so callers never unlock
// by hand.

use crate::error::Error;
use std::io;
use std::os::unix::io::RawFd;

/// A length of `0` in a `struct flock` means "to the end of the file",
/// which is how whole-region locks (index init, record-region append,
/// data-file append) are expressed.
pub const TO_EOF: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

/// An acquired advisory lock on `[offset, offset + len)` (or to EOF, if
/// `len == TO_EOF`) of `fd`. Releases the lock on drop.
#[derive(Debug)]
pub struct LockGuard {
    fd: RawFd,
    offset: i64,
    len: i64,
}

fn apply(fd: RawFd, offset: i64, len: i64, l_type: i32) -> io::Result<()> {
    // SAFETY: `flock` is a plain-old-data struct; zero-initializing it and
    // then setting the fields `fcntl` actually reads is the standard way
    // to build one, since its layout (field order, padding) varies across
    // targets and the `libc` crate doesn't expose a constructor.
    let mut flock: libc::flock = unsafe { std::mem::zeroed() };
    flock.l_type = l_type as _;
    flock.l_whence = libc::SEEK_SET as _;
    flock.l_start = offset as libc::off_t;
    flock.l_len = len as libc::off_t;

    let ret = unsafe { libc::fcntl(fd, libc::F_SETLKW, &flock) };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Acquire a blocking advisory lock on `[offset, offset + len)` of `fd`
/// (or to EOF if `len == TO_EOF`). Blocks until the lock is available;
/// there is no timeout (spec.md §5: "no timeout and no attempt at
/// deadlock detection").
pub fn lock(fd: RawFd, offset: i64, len: i64, mode: LockMode) -> Result<LockGuard, Error> {
    let l_type = match mode {
        LockMode::Read => libc::F_RDLCK,
        LockMode::Write => libc::F_WRLCK,
    };
    apply(fd, offset, len, l_type)?;
    Ok(LockGuard { fd, offset, len })
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = apply(self.fd, self.offset, self.len, libc::F_UNLCK) {
            // The fd is still open (closing it would release the lock for
            // free, per spec.md §5's cancellation note) so a failure here
            // indicates something unexpected; it's not fatal since the
            // caller has already moved past the locked section.
            tracing::warn!(
                "failed to release lock at offset {} len {}: {err}",
                self.offset,
                self.len
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch_file() -> std::fs::File {
        let mut f = tempfile::tempfile().unwrap();
        f.write_all(&[0u8; 64]).unwrap();
        f
    }

    #[test]
    fn read_locks_are_shared() {
        use std::os::unix::io::AsRawFd;
        let f = scratch_file();
        let fd = f.as_raw_fd();
        let g1 = lock(fd, 0, 1, LockMode::Read).unwrap();
        let g2 = lock(fd, 0, 1, LockMode::Read).unwrap();
        drop(g1);
        drop(g2);
    }

    #[test]
    fn write_lock_then_unlock_allows_reacquire() {
        use std::os::unix::io::AsRawFd;
        let f = scratch_file();
        let fd = f.as_raw_fd();
        {
            let _g = lock(fd, 5, 1, LockMode::Write).unwrap();
        }
        let _g2 = lock(fd, 5, 1, LockMode::Write).unwrap();
    }
}
