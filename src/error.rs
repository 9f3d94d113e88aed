// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

// Error taxonomy and the fatal-fail sink.
//
// spec.md §7 splits failures into three buckets: caller errors (returned
// normally), format/corruption violations and I/O errors (both fatal —
// the on-disk invariants can no longer be trusted), and open-time resource
// errors (handle is freed, `None` comes back). The first bucket is plain
// `Error` variants; the second and third are also `Error` variants but are
// additionally routed through a `FatalSink` at the public API boundary.

use std::fmt;
use thiserror::Error;

/// Database error.
#[derive(Debug, Error)]
pub enum Error {
    /// `store` called with a mode other than insert/replace/upsert.
    #[error("invalid store mode")]
    InvalidMode,
    /// Value shorter than `DATLEN_MIN - 1` bytes.
    #[error("value too small")]
    ValueTooSmall,
    /// Value longer than `DATLEN_MAX - 1` bytes, or key too long for the
    /// index body to fit in `IDXLEN_MAX`.
    #[error("value too large")]
    ValueTooLarge,
    /// `replace`, `fetch`, or `delete` on a key that isn't present.
    #[error("key not found")]
    KeyNotFound,
    /// `insert` on a key that already exists.
    #[error("key already exists")]
    KeyExists,
    /// An on-disk structure didn't parse as the format requires: a
    /// non-decimal pointer/length field, a missing separator, a missing
    /// trailing newline, or a length outside its valid range. This is
    /// `spec.md`'s "format violation" bucket and is always fatal.
    #[error("index or data file corrupt: {0}")]
    Corrupt(String),
    /// Any I/O failure (short read/write, seek, lock). Always fatal.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error represents corruption or an I/O failure, per
    /// spec.md §7.2-3 — the caller-error variants are not fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Corrupt(_) | Error::Io(_))
    }
}

/// The fatal-fail sink named as an external collaborator in spec.md §1/§6:
/// a function that logs a fatal condition and terminates. The core calls
/// into one of these whenever a [`Error::is_fatal`] error reaches the
/// public API boundary, rather than returning it to the caller.
///
/// The default ([`AbortSink`]) matches the source's `err_dump`-then-abort
/// behavior. Embedders and tests that need to observe a fatal condition
/// without killing the process can supply [`PanicSink`] (or their own
/// impl) via [`crate::handle::Handle::create_with_sink`] or
/// [`crate::handle::Handle::open_existing_with_sink`].
pub trait FatalSink: fmt::Debug + Send + Sync {
    /// Report a fatal error. Must not return.
    fn fatal(&self, err: &Error) -> !;
}

/// Logs via `tracing::error!` and aborts the process. The default sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortSink;

impl FatalSink for AbortSink {
    fn fatal(&self, err: &Error) -> ! {
        tracing::error!("fatal database error: {err}");
        std::process::abort();
    }
}

/// Logs via `tracing::error!` and panics instead of aborting. Intended for
/// tests and embedders that want to unwind (e.g. across a `catch_unwind`
/// boundary) rather than terminate the whole process.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanicSink;

impl FatalSink for PanicSink {
    fn fatal(&self, err: &Error) -> ! {
        tracing::error!("fatal database error: {err}");
        panic!("fatal database error: {err}");
    }
}
