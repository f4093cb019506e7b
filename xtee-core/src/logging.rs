// Copyright 2021-Present
// SPDX-License-Identifier: Apache-2.0

//! The product's own wire format, plumbed through the `log` crate's `Log`
//! trait: `\r\nxtee[<cat>]: <msg>\r\n`, gated by a bitmask rather than an
//! ordered severity — `-v` is parsed straight into `logflags` and checked
//! with a bitwise AND, exactly as `Xtee::errlog` does in the source this is
//! ported from.

use std::io::Write;
use std::os::fd::{FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};

pub const CAT_TRACE: u32 = 1;
pub const CAT_ERROR: u32 = 2;

fn category_of(level: Level) -> u32 {
    match level {
        Level::Error => CAT_ERROR,
        Level::Warn | Level::Info | Level::Debug | Level::Trace => CAT_TRACE,
    }
}

pub struct XteeLogger {
    logflags: AtomicU32,
    sink: Mutex<std::fs::File>,
}

impl XteeLogger {
    fn new(sink: OwnedFd, logflags: u32) -> Self {
        XteeLogger {
            logflags: AtomicU32::new(logflags),
            sink: Mutex::new(std::fs::File::from(sink)),
        }
    }

    pub fn set_logflags(&self, logflags: u32) {
        self.logflags.store(logflags, Ordering::Relaxed);
    }

    /// Duplicates `stderr_fd` for the logger's own exclusive use (so the
    /// logger keeps working even after the endpoint registry closes its copy
    /// of the harness's stderr) and installs the logger as the `log` crate's
    /// global backend.
    pub fn install(stderr_fd: std::os::fd::RawFd, logflags: u32) -> std::io::Result<()> {
        let dup = nix::unistd::dup(stderr_fd).map_err(std::io::Error::from)?;
        // Safety: `dup` just returned a freshly owned fd.
        let owned = unsafe { OwnedFd::from_raw_fd(dup) };
        let logger = Box::new(XteeLogger::new(owned, logflags));
        log::set_boxed_logger(logger)
            .map(|()| log::set_max_level(LevelFilter::Trace))
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
    }
}

impl Log for XteeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.logflags.load(Ordering::Relaxed) & category_of(metadata.level()) != 0
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let category = category_of(record.level());
        let line = format!("\r\nxtee[{category:02x}]: {}\r\n", record.args());
        if let Ok(mut sink) = self.sink.lock() {
            let _ = sink.write_all(line.as_bytes());
        }
    }

    fn flush(&self) {
        if let Ok(mut sink) = self.sink.lock() {
            let _ = sink.flush();
        }
    }
}
