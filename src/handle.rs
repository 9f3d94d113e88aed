// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

// Store API: the externally visible operations (spec.md §4.4) that
// orchestrate the codec, file record I/O, and free-list/hash-chain layers
// underneath. This is where the per-operation algorithms and the locking
// discipline of spec.md §5 actually live.

use crate::codec::{self, DATLEN_MAX, DATLEN_MIN};
use crate::config::DbConfig;
use crate::error::{AbortSink, Error, FatalSink};
use crate::io::{self, IndexRecord, ScannedRecord, Whence};
use crate::list;
use crate::lock::{self, LockMode};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// `store`'s write-mode argument (spec.md §4.4.6, §9 "variable-arity
/// open" note — recommends a tagged enum over the source's bare flags).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Must not already exist.
    Insert,
    /// Must already exist.
    Replace,
    /// Either.
    Upsert,
}

/// Observational per-handle operation counters (spec.md §7, §9: "expose
/// them as a read-only snapshot struct" rather than raw mutable fields).
/// Not synchronized across processes or handles; purely diagnostic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub fetch_ok: u64,
    pub fetch_err: u64,
    pub del_ok: u64,
    pub del_err: u64,
    pub store_err: u64,
    /// `store` appended a brand-new index+data record pair.
    pub stor1: u64,
    /// `store` reused a free-list slot with an exact length match.
    pub stor2: u64,
    /// `store` replaced a record whose new length differs from the old.
    pub stor3: u64,
    /// `store` replaced a record in place, same length.
    pub stor4: u64,
    pub nextrec: u64,
}

/// One open database instance (spec.md §3.4). Single-owner: per spec.md
/// §5's "shared resources" note, a `Handle` is not `Send`/`Sync` and must
/// not be shared across threads without external synchronization — the
/// scratch/cursor state below is exactly the `idxbuf`/`databuf`
/// single-owner state spec.md §9 calls out.
pub struct Handle<S: FatalSink = AbortSink> {
    idx: File,
    dat: File,
    nhash: u64,
    cursor: u64,
    counters: Counters,
    sink: S,
}

fn idx_path(base: &Path) -> PathBuf {
    let mut p = base.as_os_str().to_owned();
    p.push(".idx");
    PathBuf::from(p)
}

fn dat_path(base: &Path) -> PathBuf {
    let mut p = base.as_os_str().to_owned();
    p.push(".dat");
    PathBuf::from(p)
}

/// First byte of the index record region, past the directory and its
/// trailing newline (spec.md §3.2, §4.4.3).
fn first_record_offset(nhash: u64) -> u64 {
    codec::PTR_SZ as u64 * (nhash + 1) + 1
}

impl Handle<AbortSink> {
    /// Open an existing database for read-only access.
    pub fn open_readonly(path: impl AsRef<Path>, nhash: u64) -> Result<Self, Error> {
        Self::open_existing_with_sink(path, nhash, false, AbortSink)
    }

    /// Open an existing database for read-write access.
    pub fn open_existing(path: impl AsRef<Path>, nhash: u64) -> Result<Self, Error> {
        Self::open_existing_with_sink(path, nhash, true, AbortSink)
    }

    /// Create a new database (or truncate an existing one per
    /// `config.truncate`), per spec.md §4.4.1 and §9's variable-arity-open
    /// note.
    pub fn create(path: impl AsRef<Path>, config: &DbConfig) -> Result<Self, Error> {
        Self::create_with_sink(path, config, AbortSink)
    }
}

impl<S: FatalSink> Handle<S> {
    /// As [`Handle::open_readonly`]/[`Handle::open_existing`], but with an
    /// explicit [`FatalSink`].
    pub fn open_existing_with_sink(
        path: impl AsRef<Path>,
        nhash: u64,
        read_write: bool,
        sink: S,
    ) -> Result<Self, Error> {
        let base = path.as_ref();
        let idx = OpenOptions::new()
            .read(true)
            .write(read_write)
            .open(idx_path(base))?;
        let dat = OpenOptions::new()
            .read(true)
            .write(read_write)
            .open(dat_path(base))?;
        Ok(Handle {
            idx,
            dat,
            nhash,
            cursor: first_record_offset(nhash),
            counters: Counters::default(),
            sink,
        })
    }

    /// As [`Handle::create`], but with an explicit [`FatalSink`] — the
    /// hook tests use to observe a fatal condition via `PanicSink` instead
    /// of aborting the process.
    pub fn create_with_sink(path: impl AsRef<Path>, config: &DbConfig, sink: S) -> Result<Self, Error> {
        let base = path.as_ref();
        let mut idx_opts = OpenOptions::new();
        idx_opts.read(true).write(true).create(true).mode(config.mode);
        // spec.md's Open Questions flag a malformed precedence expression
        // in the source (`flags & (CREATE|TRUNC) == (CREATE|TRUNC)`,
        // which due to precedence actually tests `flags & 1`). Here
        // `config.truncate` is an explicit boolean, not a reconstruction
        // of that expression — see `DbConfig::truncate`.
        if config.truncate {
            idx_opts.truncate(true);
        }
        let idx = idx_opts.open(idx_path(base))?;

        let mut dat_opts = OpenOptions::new();
        dat_opts.read(true).write(true).create(true).mode(config.mode);
        if config.truncate {
            dat_opts.truncate(true);
        }
        let dat = dat_opts.open(dat_path(base))?;

        if idx.metadata()?.len() == 0 {
            Self::initialize_index(&idx, config.nhash)?;
        }

        Ok(Handle {
            idx,
            dat,
            nhash: config.nhash,
            cursor: first_record_offset(config.nhash),
            counters: Counters::default(),
            sink,
        })
    }

    /// Initialize an empty index file: `N+1` null pointers (free-list head
    /// + `N` bucket heads) followed by a newline, under a whole-file write
    /// lock (spec.md §4.4.1, §5 "index initialization").
    fn initialize_index(idx: &File, nhash: u64) -> Result<(), Error> {
        let _guard = lock::lock(idx.as_raw_fd(), 0, lock::TO_EOF, LockMode::Write)?;
        let mut buf = Vec::with_capacity((codec::PTR_SZ as u64 * (nhash + 1) + 1) as usize);
        for _ in 0..=nhash {
            buf.extend_from_slice(&codec::encode_ptr(0)?);
        }
        buf.push(codec::NEWLINE);
        idx.set_len(0)?;
        std::os::unix::fs::FileExt::write_all_at(idx, &buf, 0)?;
        Ok(())
    }

    fn chain_offset(&self, key: &[u8]) -> u64 {
        list::bucket_offset(list::hash(key, self.nhash))
    }

    /// Route a fatal (`is_fatal()`) error to the sink; pass caller errors
    /// straight through. Every public operation funnels its internal
    /// `Result` through this before returning, per spec.md §7's
    /// fatal/caller-error split.
    fn route<T>(&self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(ref err) = result {
            if err.is_fatal() {
                self.sink.fatal(err);
            }
        }
        result
    }

    /// Reposition the sequential-scan cursor at the first record
    /// (spec.md §4.4.3). Takes no lock.
    pub fn rewind(&mut self) {
        self.cursor = first_record_offset(self.nhash);
    }

    /// Close the handle explicitly (spec.md §4.4.2). Dropping a `Handle`
    /// without calling this closes the fds (and releases any outstanding
    /// locks with them) the same way — this consuming form exists only for
    /// callers that want to observe an error from the final flush rather
    /// than have it silently discarded in a destructor.
    pub fn close(self) -> Result<(), Error> {
        self.idx.sync_all()?;
        self.dat.sync_all()?;
        Ok(())
    }

    /// Observational counters snapshot (spec.md §7, §9).
    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Sequential scan from the cursor to EOF, skipping freed slots
    /// (spec.md §4.4.4).
    pub fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>, Error> {
        let result = self.next_inner();
        self.route(result)
    }

    fn next_inner(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>, Error> {
        loop {
            let len = self.idx.metadata()?.len();
            if self.cursor >= len {
                return Ok(None);
            }
            let offset = self.cursor;
            let _guard = lock::lock(self.idx.as_raw_fd(), offset as i64, 1, LockMode::Read)?;
            let scanned = io::read_idx_raw(&self.idx, offset)?;
            match scanned {
                ScannedRecord::Free { idxlen, .. } => {
                    self.cursor = offset + io::idx_record_size(idxlen);
                    continue;
                }
                ScannedRecord::Live(record) => {
                    let value = io::read_dat(&self.dat, record.datoff, record.datlen)?;
                    self.cursor = offset + io::idx_record_size(record.idxlen);
                    self.counters.nextrec += 1;
                    return Ok(Some((record.key, value)));
                }
            }
        }
    }

    /// Look up `key` (spec.md §4.4.5).
    pub fn fetch(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let result = self.fetch_inner(key);
        self.route(result)
    }

    fn fetch_inner(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let chainoff = self.chain_offset(key);
        let _guard = lock::lock(self.idx.as_raw_fd(), chainoff as i64, 1, LockMode::Read)?;
        let search = list::find_in_chain(&self.idx, chainoff, key)?;
        match search.found {
            None => {
                self.counters.fetch_err += 1;
                Ok(None)
            }
            Some(record) => {
                let value = io::read_dat(&self.dat, record.datoff, record.datlen)?;
                self.counters.fetch_ok += 1;
                Ok(Some(value))
            }
        }
    }

    fn validate_value(value: &[u8]) -> Result<u64, Error> {
        let datlen = value.len() as u64 + 1;
        if datlen < DATLEN_MIN {
            return Err(Error::ValueTooSmall);
        }
        if datlen > DATLEN_MAX {
            return Err(Error::ValueTooLarge);
        }
        Ok(datlen)
    }

    /// Insert, replace, or upsert `key` → `value` (spec.md §4.4.6).
    pub fn store(&mut self, key: &[u8], value: &[u8], mode: Mode) -> Result<(), Error> {
        let result = self.store_inner(key, value, mode);
        if result.is_err() {
            self.counters.store_err += 1;
        }
        self.route(result)
    }

    fn store_inner(&mut self, key: &[u8], value: &[u8], mode: Mode) -> Result<(), Error> {
        let datlen = Self::validate_value(value)?;
        let chainoff = self.chain_offset(key);
        let _guard = lock::lock(self.idx.as_raw_fd(), chainoff as i64, 1, LockMode::Write)?;
        let search = list::find_in_chain(&self.idx, chainoff, key)?;
        let ptroff = search.ptroff;
        let found = search.found;

        match (found, mode) {
            (None, Mode::Replace) => Err(Error::KeyNotFound),
            (None, Mode::Insert) | (None, Mode::Upsert) => {
                self.insert_new(chainoff, key, value, datlen)
            }
            (Some(_), Mode::Insert) => Err(Error::KeyExists),
            (Some(record), Mode::Replace) | (Some(record), Mode::Upsert) => {
                if record.datlen == datlen {
                    self.replace_in_place(&record, value)
                } else {
                    self.replace_differing_length(chainoff, ptroff, &record, key, value, datlen)
                }
            }
        }
    }

    /// Whole-region write lock from the end of the hash directory to EOF,
    /// covering every index record ever appended (spec.md §5 "Append to
    /// index record region"). Acquired before the append so that two
    /// handles appending to different buckets can't both observe the same
    /// EOF offset from `write_idx`'s internal `file.metadata()?.len()`.
    fn lock_index_append(&self) -> Result<lock::LockGuard, Error> {
        lock::lock(
            self.idx.as_raw_fd(),
            first_record_offset(self.nhash) as i64,
            lock::TO_EOF,
            LockMode::Write,
        )
    }

    /// Whole-file write lock on the data file, covering the same race as
    /// [`Handle::lock_index_append`] but for `write_dat`'s append path
    /// (spec.md §5 "Append to data file").
    fn lock_data_append(&self) -> Result<lock::LockGuard, Error> {
        lock::lock(self.dat.as_raw_fd(), 0, lock::TO_EOF, LockMode::Write)
    }

    /// No existing record: reuse a free-list slot of exactly matching
    /// shape if one exists, otherwise append fresh records at EOF.
    fn insert_new(&mut self, chainoff: u64, key: &[u8], value: &[u8], datlen: u64) -> Result<(), Error> {
        let keylen = key.len() as u64;
        let idx_fd = self.idx.as_raw_fd();
        if let Some(slot) = list::find_free(&self.idx, idx_fd, keylen, datlen)? {
            let (_, written_datlen) = io::write_dat(&self.dat, value, Whence::Set(slot.datoff))?;
            debug_assert_eq!(written_datlen, datlen);
            let prev_head = io::read_ptr(&self.idx, chainoff)?;
            io::write_idx(&self.idx, key, slot.datoff, datlen, prev_head, Whence::Set(slot.idxoff))?;
            list::head_insert(&self.idx, chainoff, slot.idxoff)?;
            self.counters.stor2 += 1;
        } else {
            let datoff = {
                let _guard = self.lock_data_append()?;
                let (datoff, written_datlen) = io::write_dat(&self.dat, value, Whence::End)?;
                debug_assert_eq!(written_datlen, datlen);
                datoff
            };
            {
                let _guard = self.lock_index_append()?;
                list::append_and_link(&self.idx, chainoff, key, datoff, datlen, Whence::End)?;
            }
            self.counters.stor1 += 1;
        }
        Ok(())
    }

    /// Same `datlen`: overwrite the data record's bytes in place, index
    /// untouched (spec.md §4.4.6's `stor4` row).
    fn replace_in_place(&mut self, record: &IndexRecord, value: &[u8]) -> Result<(), Error> {
        io::write_dat(&self.dat, value, Whence::Set(record.datoff))?;
        self.counters.stor4 += 1;
        Ok(())
    }

    /// Differing `datlen`: delete the old record, then append the new
    /// data and index records, re-reading the chain head since the
    /// deletion may have changed it (spec.md §4.4.6's `stor3` row).
    fn replace_differing_length(
        &mut self,
        chainoff: u64,
        ptroff: u64,
        record: &IndexRecord,
        key: &[u8],
        value: &[u8],
        datlen: u64,
    ) -> Result<(), Error> {
        let idx_fd = self.idx.as_raw_fd();
        list::delete_record(&self.idx, &self.dat, idx_fd, ptroff, record)?;
        self.counters.del_ok += 1;

        let datoff = {
            let _guard = self.lock_data_append()?;
            let (datoff, written_datlen) = io::write_dat(&self.dat, value, Whence::End)?;
            debug_assert_eq!(written_datlen, datlen);
            datoff
        };
        {
            let _guard = self.lock_index_append()?;
            list::append_and_link(&self.idx, chainoff, key, datoff, datlen, Whence::End)?;
        }
        self.counters.stor3 += 1;
        Ok(())
    }

    /// Remove `key` (spec.md §4.4.7).
    pub fn delete(&mut self, key: &[u8]) -> Result<(), Error> {
        let result = self.delete_inner(key);
        if result.is_err() {
            self.counters.del_err += 1;
        }
        self.route(result)
    }

    fn delete_inner(&mut self, key: &[u8]) -> Result<(), Error> {
        let chainoff = self.chain_offset(key);
        let _guard = lock::lock(self.idx.as_raw_fd(), chainoff as i64, 1, LockMode::Write)?;
        let search = list::find_in_chain(&self.idx, chainoff, key)?;
        let record = search.found.ok_or(Error::KeyNotFound)?;
        let idx_fd = self.idx.as_raw_fd();
        list::delete_record(&self.idx, &self.dat, idx_fd, search.ptroff, &record)?;
        self.counters.del_ok += 1;
        Ok(())
    }
}
