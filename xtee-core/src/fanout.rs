// Copyright 2021-Present
// SPDX-License-Identifier: Apache-2.0

//! One-source-to-many-destinations byte broadcast. Reads a single block from
//! a ready source and dispatches it per-destination: back into the ingress
//! QoS path if the destination is the harness's input, as a line-oriented
//! diagnostic if the destination is the harness's error stream fed by a
//! child, or as a raw write otherwise.

use std::collections::HashMap;
use std::io;

use crate::endpoint::{EndpointRegistry, HARNESS_STDERR, HARNESS_STDIN};
use crate::graph::EndpointId;
use crate::qos::QosState;

/// Largest single read attempted from a source endpoint per cycle.
pub const READ_BLOCK_SIZE: usize = 4096;

/// Buffers a trailing partial line per source, so that a diagnostic line
/// split across two reads is still logged as one line. Flushed (without a
/// trailing newline) when the owning child dies.
#[derive(Default)]
pub struct LineAssembly {
    pending: HashMap<EndpointId, Vec<u8>>,
}

impl LineAssembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` to the endpoint's pending buffer and emits one log
    /// line per complete (newline-terminated) line found, child-index
    /// prefixed. Any trailing partial line is retained for the next call.
    fn feed(&mut self, src_seq: usize, src: EndpointId, chunk: &[u8]) {
        let buf = self.pending.entry(src).or_default();
        buf.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(pos) = buf[start..].iter().position(|&b| b == b'\n') {
            let line_end = start + pos;
            let line = String::from_utf8_lossy(&buf[start..line_end]);
            log::trace!("[{src_seq}] {}", line.trim_end_matches('\r'));
            start = line_end + 1;
        }
        buf.drain(..start);
    }

    /// Flushes a source's partial trailing line, e.g. on child death.
    pub fn flush(&mut self, src_seq: usize, src: EndpointId) {
        if let Some(buf) = self.pending.remove(&src) {
            if !buf.is_empty() {
                log::trace!("[{src_seq}] {}", String::from_utf8_lossy(&buf));
            }
        }
    }
}

/// Reads up to [`READ_BLOCK_SIZE`] bytes from `src` and broadcasts them to
/// every destination in `fwd[src]`. Returns the number of bytes read, or the
/// read error if the endpoint failed (the caller closes the source on
/// error).
pub fn forward_from(
    src: EndpointId,
    src_seq: usize,
    registry: &mut EndpointRegistry,
    qos: &mut QosState,
    lines: &mut LineAssembly,
) -> io::Result<usize> {
    let mut buf = [0u8; READ_BLOCK_SIZE];
    let n = registry.read(src, &mut buf)?;
    if n == 0 {
        return Ok(0);
    }
    let block = &buf[..n];

    for dest in registry.destinations_of(src) {
        if dest == HARNESS_STDIN {
            qos.process(registry, block);
        } else if dest == HARNESS_STDERR {
            lines.feed(src_seq, src, block);
        } else if let Err(err) = registry.write(dest, block) {
            log::error!("write to endpoint {dest} failed: {err}");
        }
    }

    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_assembly_holds_partial_line_across_feeds() {
        let mut lines = LineAssembly::new();
        lines.feed(1, 10, b"hello wor");
        lines.feed(1, 10, b"ld\n");
        lines.flush(1, 10);
    }

    #[test]
    fn line_assembly_flush_emits_trailing_partial_line() {
        let mut lines = LineAssembly::new();
        lines.feed(2, 11, b"no newline yet");
        lines.flush(2, 11);
        assert!(lines.pending.get(&11).is_none());
    }
}
