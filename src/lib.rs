// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! An embeddable, file-backed key-value store offering associative access
//! to short textual records. A database instance is two sibling files,
//! `<path>.idx` and `<path>.dat`: the index file holds a fixed-size hash
//! directory plus a linked chain of index records, the data file holds
//! the raw value payloads. Concurrent access from multiple independent
//! processes on the same host is coordinated entirely through advisory
//! byte-range record locks on the index file — there is no in-process
//! sharing of a single [`Handle`] across threads.

mod codec;
mod config;
mod error;
mod handle;
mod io;
mod list;
mod lock;

pub use config::DbConfig;
pub use error::{AbortSink, Error, FatalSink, PanicSink};
pub use handle::{Counters, Handle, Mode};
