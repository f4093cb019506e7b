// Copyright 2021-Present
// SPDX-License-Identifier: Apache-2.0

//! The `xtee` stream-routing engine: an endpoint registry and link graph,
//! a child process supervisor, a link-spec parser and graph builder, the
//! ingress QoS controller, the fan-out transport, the command tokenizer, the
//! event loop that ties them together, and the product's own structured
//! logger.
//!
//! This crate owns no signal handling and no argument parsing (see spec §1)
//! — it exposes [`StopToken`] as the single point of contact for external
//! cancellation, and [`config::Config`] as the input the binary crate builds
//! from parsed flags.

pub mod child;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod event_loop;
pub mod fanout;
pub mod graph;
pub mod linkspec;
pub mod logging;
pub mod qos;
pub mod spawn;
pub mod stop;
pub mod tokenize;

pub use config::Config;
pub use error::{LinkError, XteeError};
pub use event_loop::EventLoop;
pub use stop::StopToken;

use std::os::fd::{FromRawFd, OwnedFd};

use endpoint::EndpointRegistry;
use spawn::ChildSpawner;

/// Assembles and runs a complete `xtee` session from a validated [`Config`]:
/// spawns every declared child, installs explicit links, applies orphan
/// defaults, then hands off to the [`EventLoop`]. Exists as a free function
/// (rather than a method on `Config`) so the binary crate's `main` stays a
/// thin wrapper over exit-code mapping, matching the separation spec.md §6
/// draws between argument parsing and the engine itself.
///
/// # Safety
/// `stdin_fd`/`stdout_fd`/`stderr_fd` must be valid, open, and not owned
/// elsewhere — callers pass the process's real 0/1/2 in production and a
/// trio of fresh pipe/socket fds in tests.
pub unsafe fn run(
    config: &Config,
    spawner: &dyn ChildSpawner,
    stdin_fd: std::os::fd::RawFd,
    stdout_fd: std::os::fd::RawFd,
    stderr_fd: std::os::fd::RawFd,
    stop: StopToken,
) -> XteeError {
    let stdin = OwnedFd::from_raw_fd(stdin_fd);
    let stdout = OwnedFd::from_raw_fd(stdout_fd);
    let stderr = OwnedFd::from_raw_fd(stderr_fd);
    let mut registry = EndpointRegistry::with_harness_streams(stdin, stdout, stderr);

    let mut supervisor = child::ChildSupervisor::new();
    if let Err(err) = supervisor.spawn_all(spawner, &mut registry, &config.commands) {
        return err;
    }

    linkspec::build_explicit_links(&config.link_specs, &mut registry, supervisor.children());
    linkspec::apply_orphan_defaults(&mut registry, supervisor.children());

    let qos = qos::QosState::new(config.qos);
    let mut event_loop = EventLoop::new(registry, supervisor, qos, stop, config.secs_timeout);
    event_loop.run()
}
