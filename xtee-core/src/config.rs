// Copyright 2021-Present
// SPDX-License-Identifier: Apache-2.0

//! Validated run configuration assembled from CLI flags. Carries the
//! `-n`/`-a` flags for command-line compatibility even though the graph
//! builder never consults them — see `original_source`'s `Options::noOutFile`
//! / `Options::append`, which are likewise write-only in the control flow
//! this was ported from.

use crate::qos::QosConfig;

/// Default verbosity bitmask (`TRACE | ERROR`) when `-v` is not given.
pub const DEFAULT_LOGFLAGS: u32 = 4;

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// `-c`: one declared child command per entry, in declaration order.
    pub commands: Vec<String>,
    /// `-l`: one link spec per entry, in declaration order.
    pub link_specs: Vec<String>,
    /// `-n`: suppress default output file. Parsed, never read by the graph
    /// builder — see module docs.
    pub no_out_file: bool,
    /// `-a`: append mode. Parsed, never read by the graph builder.
    pub append: bool,
    /// `-q SECS`: inactivity timeout. `0` disables it.
    pub secs_timeout: u64,
    /// `-v LEVEL`: category bitmask for the logger (`TRACE=1`, `ERROR=2`).
    pub logflags: u32,
    pub qos: QosConfig,
}

impl Config {
    pub fn new() -> Self {
        Config {
            logflags: DEFAULT_LOGFLAGS,
            ..Default::default()
        }
    }
}
