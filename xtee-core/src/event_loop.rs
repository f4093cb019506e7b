// Copyright 2021-Present
// SPDX-License-Identifier: Apache-2.0

//! The single-threaded readiness loop: builds the watch set from the link
//! graph, waits on [`xtee_common::poll_wait`], dispatches ready sources
//! through either the fan-out transport or the ingress QoS path, reaps dead
//! children, and evaluates the termination predicates from spec §4.4.

use std::collections::{HashMap, HashSet};
use std::os::unix::io::RawFd;
use std::time::Duration;

use xtee_common::poll::Readiness;

use crate::child::ChildSupervisor;
use crate::endpoint::{EndpointRegistry, HARNESS_STDERR, HARNESS_STDIN, HARNESS_STDOUT};
use crate::error::XteeError;
use crate::fanout::{self, LineAssembly, READ_BLOCK_SIZE};
use crate::graph::EndpointId;
use crate::qos::QosState;
use crate::stop::StopToken;

/// One event-loop tick, derived as `1000ms / QOS_MEASURES_PER_SEC`.
const TICK: Duration = Duration::from_millis(100);
const TICK_MS: u64 = 100;
/// How long the loop waits with zero bytes moved before forcing a reap.
const IDLE_REAP_THRESHOLD_MS: u64 = 10_000;

pub struct EventLoop {
    registry: EndpointRegistry,
    supervisor: ChildSupervisor,
    qos: QosState,
    lines: LineAssembly,
    stop: StopToken,
    secs_timeout: u64,
    timeouts: u64,
    idle_cycles: u64,
    idle_ms: u64,
    child_check_requested: bool,
}

impl EventLoop {
    pub fn new(
        registry: EndpointRegistry,
        supervisor: ChildSupervisor,
        qos: QosState,
        stop: StopToken,
        secs_timeout: u64,
    ) -> Self {
        EventLoop {
            registry,
            supervisor,
            qos,
            lines: LineAssembly::new(),
            stop,
            secs_timeout,
            timeouts: 0,
            idle_cycles: 0,
            idle_ms: 0,
            child_check_requested: false,
        }
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    pub fn idle_cycles(&self) -> u64 {
        self.idle_cycles
    }

    /// Runs the loop to completion. Always returns — the return value names
    /// *why* the loop stopped, not whether it "succeeded"; clean termination
    /// and fatal errors share the same `XteeError` surface (see
    /// `XteeError::exit_code`).
    pub fn run(&mut self) -> XteeError {
        loop {
            if self.child_check_requested || self.idle_ms >= IDLE_REAP_THRESHOLD_MS {
                self.reap();
            }

            // Gated on at least one declared child: with zero `-c` commands
            // there is nothing whose disappearance this predicate could be
            // detecting, and a bare harness (e.g. `-k`/`-d`-only stdin QoS
            // usage) must keep running on stdin alone until EOF/duration/
            // timeout/stop ends it rather than quitting on its first tick.
            let fds = self.build_watch_set();
            if !self.supervisor.children().is_empty() && fds.len() == 1 {
                return self.finish(XteeError::NoSourcesRemained);
            }

            if self.stop.is_stopped() {
                return self.finish(XteeError::ExternalStop);
            }

            let readiness = match xtee_common::poll_wait(&fds, TICK) {
                Ok(r) => r,
                Err(err) => return self.finish(XteeError::WaitError(err)),
            };

            if self.stop.is_stopped() {
                return self.finish(XteeError::ExternalStop);
            }

            let by_fd: HashMap<RawFd, Readiness> =
                readiness.into_iter().map(|r| (r.fd, r)).collect();

            if !by_fd.values().any(|r| r.readable || r.errored) {
                self.timeouts += 1;
                self.child_check_requested = true;
                self.idle_ms += TICK_MS;
                if let Some(reason) = self.check_timeout() {
                    return self.finish(reason);
                }
                continue;
            }

            let mut bytes_moved = 0usize;
            let mut stdin_closed = false;

            if let Some(r) = by_fd.get(&HARNESS_STDIN).copied() {
                if r.readable {
                    let mut buf = [0u8; READ_BLOCK_SIZE];
                    match self.registry.read(HARNESS_STDIN, &mut buf) {
                        Ok(0) => stdin_closed = true,
                        Ok(n) => {
                            bytes_moved += n;
                            self.qos.process(&mut self.registry, &buf[..n]);
                        }
                        Err(_) => stdin_closed = true,
                    }
                }
                if r.errored && !self.registry.has_sources_for(HARNESS_STDIN) {
                    stdin_closed = true;
                }
            }

            bytes_moved += self.fan_out_children(&by_fd);

            if bytes_moved == 0 {
                self.idle_cycles += 1;
                self.idle_ms += TICK_MS;
            } else {
                self.idle_ms = 0;
            }

            if self.qos.quit {
                return self.finish(XteeError::DurationElapsed);
            }
            if stdin_closed {
                return self.finish(XteeError::StdinClosed);
            }
            if let Some(reason) = self.check_timeout() {
                return self.finish(reason);
            }
        }
    }

    fn check_timeout(&self) -> Option<XteeError> {
        if self.secs_timeout > 0 && self.timeouts * TICK_MS >= self.secs_timeout * 1000 {
            Some(XteeError::TimeoutExceeded)
        } else {
            None
        }
    }

    /// Harness input (always watched) union every source currently in `fwd`.
    fn build_watch_set(&self) -> Vec<RawFd> {
        let mut seen: HashSet<EndpointId> = HashSet::from([HARNESS_STDIN]);
        let mut fds = vec![HARNESS_STDIN];
        for s in self.registry.source_ids() {
            if seen.insert(s) {
                fds.push(s);
            }
        }
        fds
    }

    fn fan_out_children(&mut self, by_fd: &HashMap<RawFd, Readiness>) -> usize {
        let mut bytes_moved = 0usize;
        let snapshot: Vec<(usize, EndpointId, EndpointId)> = self
            .supervisor
            .children()
            .iter()
            .filter(|c| c.alive)
            .map(|c| (c.seq, c.stdout, c.stderr))
            .collect();

        for (seq, stdout, stderr) in snapshot {
            for src in [stdout, stderr] {
                if !self.registry.is_open(src) {
                    continue;
                }
                let Some(r) = by_fd.get(&src) else {
                    continue;
                };
                if r.readable {
                    match fanout::forward_from(src, seq, &mut self.registry, &mut self.qos, &mut self.lines) {
                        Ok(0) => {
                            self.lines.flush(seq, src);
                            self.registry.close_source(src);
                            self.child_check_requested = true;
                        }
                        Ok(n) => bytes_moved += n,
                        Err(err) => {
                            log::error!("read from endpoint {src} (child {seq}) failed: {err}");
                            self.lines.flush(seq, src);
                            self.registry.close_source(src);
                            self.child_check_requested = true;
                        }
                    }
                } else if r.errored {
                    self.lines.flush(seq, src);
                    self.registry.close_source(src);
                    self.child_check_requested = true;
                }
            }
        }
        bytes_moved
    }

    fn reap(&mut self) {
        self.supervisor.reap_dead(&mut self.registry);
        self.child_check_requested = false;
        self.idle_ms = 0;
    }

    /// Shutdown path: closes every child's three endpoints through the
    /// graph, then flushes the harness's own output and error.
    fn finish(&mut self, reason: XteeError) -> XteeError {
        self.supervisor.close_pipes_to_all(&mut self.registry);
        let _ = self.registry.flush(HARNESS_STDOUT);
        let _ = self.registry.flush(HARNESS_STDERR);
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qos::QosConfig;
    use std::io::{Read, Write};
    use std::os::unix::io::OwnedFd;
    use std::os::unix::net::UnixStream;

    fn harness() -> (EndpointRegistry, UnixStream, UnixStream, UnixStream) {
        let (stdin_w, stdin_r) = UnixStream::pair().unwrap();
        let (stdout_w, stdout_r) = UnixStream::pair().unwrap();
        let (stderr_w, stderr_r) = UnixStream::pair().unwrap();
        let registry = EndpointRegistry::with_harness_streams(
            OwnedFd::from(stdin_r),
            OwnedFd::from(stdout_w),
            OwnedFd::from(stderr_w),
        );
        (registry, stdin_w, stdout_r, stderr_r)
    }

    /// With zero declared children, the "no sources remained" predicate never
    /// fires — that check is about children's endpoints all disappearing, and
    /// there are none to disappear. A bare harness keeps running (e.g. for
    /// `-k`/`-d`-style stdin-only QoS usage) until stdin hits EOF, the
    /// duration fence trips, the timeout elapses, or an external stop arrives.
    #[test]
    fn bare_harness_with_no_declared_children_runs_until_stdin_closes() {
        let (mut registry, stdin_w, mut stdout_r, _stderr_r) = harness();
        registry.link(HARNESS_STDIN, HARNESS_STDOUT).unwrap();
        let mut loop_ = EventLoop::new(
            registry,
            ChildSupervisor::new(),
            QosState::new(QosConfig::default()),
            StopToken::new(),
            0,
        );

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            drop(stdin_w);
        });

        let result = loop_.run();
        assert!(matches!(result, XteeError::StdinClosed));
        let mut out = Vec::new();
        stdout_r.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn no_sources_remained_fires_once_every_declared_childs_endpoints_are_gone() {
        let (mut registry, _stdin_w, _stdout_r, _stderr_r) = harness();
        let spawner = crate::spawn::fake::RecordingSpawner::default();
        let mut supervisor = ChildSupervisor::new();
        supervisor
            .spawn_all(&spawner, &mut registry, &["cat".to_string()])
            .unwrap();
        crate::linkspec::apply_orphan_defaults(&mut registry, supervisor.children());

        let endpoints = supervisor.children()[0].endpoints();
        for id in endpoints {
            registry.close_source(id);
            registry.close_dest(id);
        }

        let mut loop_ = EventLoop::new(
            registry,
            supervisor,
            QosState::new(QosConfig::default()),
            StopToken::new(),
            0,
        );
        let result = loop_.run();
        assert!(matches!(result, XteeError::NoSourcesRemained));
    }

    #[test]
    fn pass_through_forwards_stdin_to_stdout_when_routed() {
        let (mut registry, mut stdin_w, mut stdout_r, _stderr_r) = harness();
        registry.link(HARNESS_STDIN, HARNESS_STDOUT).unwrap();
        let mut loop_ = EventLoop::new(
            registry,
            ChildSupervisor::new(),
            QosState::new(QosConfig::default()),
            StopToken::new(),
            0,
        );

        stdin_w.write_all(b"hello").unwrap();
        drop(stdin_w);

        let result = loop_.run();
        assert!(matches!(result, XteeError::StdinClosed));

        let mut out = Vec::new();
        stdout_r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn external_stop_token_ends_the_loop() {
        let (mut registry, _stdin_w, _stdout_r, _stderr_r) = harness();
        registry.link(HARNESS_STDIN, HARNESS_STDOUT).unwrap();
        let stop = StopToken::new();
        stop.request_stop();
        let mut loop_ = EventLoop::new(
            registry,
            ChildSupervisor::new(),
            QosState::new(QosConfig::default()),
            stop,
            0,
        );
        let result = loop_.run();
        assert!(matches!(result, XteeError::ExternalStop));
    }

    #[test]
    fn inactivity_timeout_fires_when_nothing_arrives() {
        let (mut registry, stdin_w, _stdout_r, _stderr_r) = harness();
        registry.link(HARNESS_STDIN, HARNESS_STDOUT).unwrap();
        let mut loop_ = EventLoop::new(
            registry,
            ChildSupervisor::new(),
            QosState::new(QosConfig::default()),
            StopToken::new(),
            1,
        );
        let result = loop_.run();
        assert!(matches!(result, XteeError::TimeoutExceeded));
        drop(stdin_w);
    }
}
