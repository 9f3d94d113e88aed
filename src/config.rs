// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

// Database creation/open configuration, in the teacher's config-struct
// idiom (`forest_db::rocks_config::RocksDbConfig`: a plain serde struct
// with a `Default` impl, one field per knob, no builder methods beyond
// what the type itself expresses).

use crate::codec::NHASH_DEFAULT;
use serde::{Deserialize, Serialize};

/// Configuration for creating a new database. Only meaningful at creation
/// time: spec.md §1 excludes dynamic rehashing, so `nhash` is fixed for
/// the lifetime of the on-disk files once they're initialized.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DbConfig {
    /// Hash directory size (spec.md §3.2's `N`). Defaults to the classic
    /// 137.
    pub nhash: u64,
    /// Truncate an existing, non-empty index/data file pair back to an
    /// empty database before use.
    ///
    /// spec.md's Open Questions flag a precedence bug in the source this
    /// was distilled from: `flags & (O_CREAT | O_TRUNC) == (O_CREAT |
    /// O_TRUNC)` parses (due to `==` binding tighter than `&`) as
    /// `flags & 1`, not "both create and truncate are set". This rewrite
    /// makes that condition an explicit field instead of reconstructing
    /// the buggy expression: [`crate::handle::Handle::create`] only
    /// truncates when the caller has set `truncate = true`.
    pub truncate: bool,
    /// Unix file-creation mode bits for the two new files.
    pub mode: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            nhash: NHASH_DEFAULT,
            truncate: false,
            mode: 0o644,
        }
    }
}
