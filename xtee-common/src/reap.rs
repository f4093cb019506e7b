// Copyright 2021-Present
// SPDX-License-Identifier: Apache-2.0

//! Non-blocking child reaping.
//!
//! Mirrors `reap_child_non_blocking` from this pack's process-supervision
//! code, adapted from a raw `waitpid(pid, WNOHANG)` over a bare `Pid` to
//! `std::process::Child::try_wait`, since xtee spawns via
//! `std::process::Command` rather than raw `fork`/`execve`.

use std::process::{Child, ExitStatus};

#[derive(Debug, thiserror::Error)]
pub enum ReapError {
    #[error("error waiting for child process to exit: {0}")]
    Io(#[from] std::io::Error),
}

/// Non-blocking check for whether `child` has exited.
///
/// Returns `Ok(None)` if the child is still running, `Ok(Some(status))` if
/// it has already exited. Never blocks.
pub fn try_reap(child: &mut Child) -> Result<Option<ExitStatus>, ReapError> {
    Ok(child.try_wait()?)
}
