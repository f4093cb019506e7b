// Copyright 2021-Present
// SPDX-License-Identifier: Apache-2.0

//! Error enums for the engine. `LinkError` covers link-graph and link-spec
//! validation failures; `XteeError` is the event loop's top-level outcome,
//! wrapping `LinkError` plus I/O failures and the clean-termination variants.

use std::io;

use xtee_common::{PollWaitError, ReapError};

/// Rejected link-graph mutation. These are never fatal — callers log and
/// skip, they do not abort the run.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link spec {spec:?} is not of the form [cmdNo.]fd:[cmdNo.]fd")]
    Malformed { spec: String },

    #[error("link spec {spec:?} references command {cmd_no}, but only {child_count} children were declared")]
    CmdNoOutOfRange {
        spec: String,
        cmd_no: usize,
        child_count: usize,
    },

    #[error("link spec {spec:?} has target fd {fd}; a target fd must be 0 (input)")]
    BadTargetFd { spec: String, fd: u32 },

    #[error("link spec {spec:?} has source fd {fd}; a source fd must be 1 (output) or 2 (error)")]
    BadSourceFd { spec: String, fd: u32 },

    #[error("endpoint {endpoint} cannot link to itself")]
    SelfLoop { endpoint: i32 },

    #[error("endpoint {endpoint} is negative")]
    NegativeEndpoint { endpoint: i32 },
}

/// Top-level outcome of the event loop.
#[derive(Debug, thiserror::Error)]
pub enum XteeError {
    #[error("failed to spawn child {index} ({command:?}): {source}")]
    SpawnFailed {
        index: usize,
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on endpoint {endpoint}: {source}")]
    EndpointError {
        endpoint: i32,
        #[source]
        source: io::Error,
    },

    #[error("readiness wait failed: {0}")]
    WaitError(#[from] PollWaitError),

    #[error("reap failed: {0}")]
    ReapFailed(#[from] ReapError),

    #[error("configured duration elapsed")]
    DurationElapsed,

    #[error("harness input reached EOF with no child still feeding it")]
    StdinClosed,

    #[error("inactivity timeout exceeded")]
    TimeoutExceeded,

    #[error("stopped by external signal")]
    ExternalStop,

    #[error("no sources remained")]
    NoSourcesRemained,
}

impl XteeError {
    /// Maps onto the three exit codes named in the external interface: `0`
    /// for clean termination, `-1` for argument/spec errors, `-100` for a
    /// failed spawn. Everything else (I/O, readiness, reap failures) is
    /// treated as a clean-enough stop at `0` — the loop already logged the
    /// specifics before returning.
    pub fn exit_code(&self) -> i32 {
        match self {
            XteeError::SpawnFailed { .. } => -100,
            XteeError::DurationElapsed
            | XteeError::StdinClosed
            | XteeError::TimeoutExceeded
            | XteeError::ExternalStop
            | XteeError::NoSourcesRemained
            | XteeError::WaitError(_)
            | XteeError::ReapFailed(_)
            | XteeError::EndpointError { .. } => 0,
        }
    }
}

impl From<LinkError> for XteeError {
    fn from(err: LinkError) -> Self {
        // Reaching here means a link spec survived to runtime instead of
        // being logged and skipped at parse time (see
        // linkspec::build_explicit_links). Treated as an endpoint error
        // rather than introducing a new variant.
        XteeError::EndpointError {
            endpoint: -1,
            source: io::Error::new(io::ErrorKind::InvalidInput, err.to_string()),
        }
    }
}
