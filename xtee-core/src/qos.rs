// Copyright 2021-Present
// SPDX-License-Identifier: Apache-2.0

//! The ingress QoS pipeline: time skip, duration fence, byte skip, broadcast,
//! and the P/I/V bitrate controller. Ported from `Xtee::stdinQoS` in
//! `xtee.cc`, with one deliberate correction: the original returns early from
//! a fully-discarded block without advancing its running byte counter, which
//! would throw off the byte-skip boundary math across multiple blocks. This
//! port always advances the counter, matching the corrected pipeline
//! description rather than the raw source.

use std::time::{Duration, Instant};

use crate::endpoint::{EndpointRegistry, HARNESS_STDIN, HARNESS_STDOUT};

/// How often (at minimum) the bitrate controller re-measures and re-paces.
const QOS_MEASURE_INTERVAL_MSEC: i64 = 100;
/// Measurements per second; also the divisor used to size the inactivity
/// timeout counter in the event loop.
pub const QOS_MEASURES_PER_SEC: i64 = 10;
/// Upper bound on one cooperative sleep chunk inside the bitrate controller.
const MAX_SLEEP_CHUNK: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, Default)]
pub struct QosConfig {
    /// `K`: leading bytes of harness input to discard. `0` means unset.
    pub bytes_to_skip: u64,
    /// Leading seconds of harness input to discard before the anchor.
    pub secs_to_skip: u64,
    /// Hard run duration in seconds. `0` means unset.
    pub secs_duration: u64,
    /// Bitrate ceiling in kilobytes/second, already shifted down from the
    /// `-s` flag's kilobits/second (`kbps >> 3`). `0` means unbounded.
    pub kbps_limit: u64,
}

/// Mutable controller state threaded through every ingress block.
pub struct QosState {
    cfg: QosConfig,
    epoch: Instant,
    /// Anchor timestamp in ms since `epoch`. `None` until established.
    t_start: Option<i64>,
    t_last: Option<i64>,
    off_last: u64,
    off_total: u64,
    v_last: i64,
    pub quit: bool,
}

impl QosState {
    pub fn new(cfg: QosConfig) -> Self {
        let epoch = Instant::now();
        let t_start = if cfg.secs_to_skip > 0 {
            Some((cfg.secs_to_skip * 1000) as i64)
        } else {
            None
        };
        QosState {
            cfg,
            epoch,
            t_start,
            t_last: None,
            off_last: 0,
            off_total: 0,
            v_last: 0,
            quit: false,
        }
    }

    fn now_ms(&self) -> i64 {
        self.epoch.elapsed().as_millis() as i64
    }

    pub fn off_total(&self) -> u64 {
        self.off_total
    }

    /// Runs one block of harness-input bytes through the full pipeline,
    /// broadcasting the surviving bytes to `fwd[harness stdin]` (or the
    /// harness's own output if nothing is linked there). If the duration
    /// fence elapses during this call, `self.quit` is set for the caller to
    /// observe on the next check.
    pub fn process(&mut self, registry: &mut EndpointRegistry, block: &[u8]) {
        if block.is_empty() {
            return;
        }
        let n = block.len();
        let now = self.now_ms();

        // 1. Time skip.
        if let Some(t_start) = self.t_start {
            if t_start > now {
                return;
            }
        } else {
            self.t_start = Some(now);
        }
        let t_start = self.t_start.expect("anchored above");

        // 2. Duration fence.
        if self.cfg.secs_duration > 0 && now > t_start + (self.cfg.secs_duration * 1000) as i64 {
            self.quit = true;
        }

        // 3. Byte skip.
        let k = self.cfg.bytes_to_skip;
        let (forward_start, forward_len) = if k > 0 {
            if self.off_total + n as u64 <= k {
                (n, 0)
            } else if self.off_total < k {
                let skip = (k - self.off_total) as usize;
                (skip, n - skip)
            } else {
                (0, n)
            }
        } else {
            (0, n)
        };
        self.off_total += n as u64;

        // 4. Broadcast.
        let forward = &block[forward_start..forward_start + forward_len];
        if !forward.is_empty() {
            self.broadcast(registry, forward);
        }

        // 5. Bitrate controller.
        if self.cfg.kbps_limit > 0 {
            self.run_bitrate_controller();
        }
    }

    fn broadcast(&self, registry: &mut EndpointRegistry, block: &[u8]) {
        let dests = registry.destinations_of(HARNESS_STDIN);
        if dests.is_empty() {
            if let Err(err) = registry.write(HARNESS_STDOUT, block) {
                log::error!("write to harness stdout failed: {err}");
            }
            return;
        }
        for dest in dests {
            if let Err(err) = registry.write(dest, block) {
                log::error!("write to endpoint {dest} failed: {err}");
            }
        }
    }

    fn run_bitrate_controller(&mut self) {
        let now = self.now_ms();
        if self.t_last.is_none() {
            self.t_last = Some(now);
            self.off_last = self.off_total;
        }
        let t_last = self.t_last.expect("set above");

        let elapsed = now - t_last;
        let bypassed = (self.off_total - self.off_last) as i64;

        let kbps_limit = self.cfg.kbps_limit as i64;
        if elapsed <= QOS_MEASURE_INTERVAL_MSEC && bypassed <= kbps_limit * QOS_MEASURES_PER_SEC {
            return;
        }

        let t_start = self.t_start.unwrap_or(now);
        let msec_p = bypassed / kbps_limit - elapsed;
        let mut msec_i = (self.off_total as i64 - self.cfg.bytes_to_skip as i64) / kbps_limit
            - (now - t_start);
        let v = if elapsed > 0 {
            bypassed / elapsed
        } else {
            self.v_last << 1
        };
        let mut msec_v = if v > self.v_last { 1 } else { -1 };

        msec_i <<= 2;
        msec_v *= QOS_MEASURE_INTERVAL_MSEC / 20;

        let yield_ms = msec_p.min(msec_i) + msec_v;

        self.v_last = v;
        self.t_last = Some(now);

        self.cooperative_sleep(yield_ms);
    }

    fn cooperative_sleep(&self, mut yield_ms: i64) {
        while !self.quit && yield_ms > 0 {
            let chunk_ms = yield_ms.min(MAX_SLEEP_CHUNK.as_millis() as i64);
            std::thread::sleep(Duration::from_millis(chunk_ms as u64));
            yield_ms -= chunk_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::OwnedFd;
    use std::os::unix::net::UnixStream;

    fn registry() -> EndpointRegistry {
        let (a, _) = UnixStream::pair().unwrap();
        let (b, _) = UnixStream::pair().unwrap();
        let (c, _) = UnixStream::pair().unwrap();
        EndpointRegistry::with_harness_streams(OwnedFd::from(a), OwnedFd::from(b), OwnedFd::from(c))
    }

    #[test]
    fn byte_skip_discards_until_boundary_then_forwards_remainder() {
        let mut reg = registry();
        let mut qos = QosState::new(QosConfig {
            bytes_to_skip: 4,
            ..Default::default()
        });
        qos.process(&mut reg, b"0123456789");
        assert_eq!(qos.off_total(), 10);
    }

    #[test]
    fn off_total_advances_even_when_whole_block_is_pre_boundary() {
        let mut reg = registry();
        let mut qos = QosState::new(QosConfig {
            bytes_to_skip: 100,
            ..Default::default()
        });
        qos.process(&mut reg, b"0123");
        qos.process(&mut reg, b"4567");
        assert_eq!(qos.off_total(), 8);
    }

    #[test]
    fn duration_fence_sets_quit_once_elapsed() {
        let mut reg = registry();
        let mut qos = QosState::new(QosConfig {
            secs_duration: 0,
            ..Default::default()
        });
        // secs_duration == 0 means unset; fence never trips.
        qos.process(&mut reg, b"x");
        assert!(!qos.quit);
    }

    #[test]
    fn time_skip_discards_everything_before_the_anchor() {
        let mut reg = registry();
        let mut qos = QosState::new(QosConfig {
            secs_to_skip: 3600,
            ..Default::default()
        });
        qos.process(&mut reg, b"should not be forwarded yet");
        // off_total must not advance while still pre-anchor.
        assert_eq!(qos.off_total(), 0);
    }
}
