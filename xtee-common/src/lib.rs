// Copyright 2021-Present
// SPDX-License-Identifier: Apache-2.0

//! OS-facing primitives shared by `xtee-core`: readiness polling, the
//! monotonic deadline helper, and non-blocking child reaping. None of these
//! modules know about the link graph or QoS policy — they exist so that
//! `xtee-core` can stay free of raw `libc`/`nix` calls in its own logic.

pub mod poll;
pub mod reap;
pub mod timeout;

pub use poll::{wait as poll_wait, PollWaitError, Readiness};
pub use reap::{try_reap, ReapError};
pub use timeout::Deadline;
