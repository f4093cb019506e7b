// Copyright 2021-Present
// SPDX-License-Identifier: Apache-2.0

//! A single-writer cancellation token. Signal registration is explicitly out
//! of scope for this crate (see spec §1); the binary's signal glue owns a
//! clone of this token and flips it once from a signal handler. `Relaxed`
//! ordering is sufficient: there is exactly one writer thread (the signal
//! handler) and exactly one reader thread (the event loop).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Requests a stop. Safe to call from a signal handler: it is a single
    /// relaxed store with no allocation.
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
