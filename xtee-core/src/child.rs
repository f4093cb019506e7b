// Copyright 2021-Present
// SPDX-License-Identifier: Apache-2.0

//! Child process bookkeeping: one [`ChildStub`] per declared command, plus
//! [`ChildSupervisor`], which owns the spawner, reaps exited children, and
//! tears down a child's three endpoints on death.

use std::time::Duration;

use xtee_common::Deadline;

use crate::endpoint::{EndpointRegistry, EndpointRole};
use crate::error::XteeError;
use crate::graph::EndpointId;
use crate::spawn::ChildSpawner;

/// Bound a single reap attempt waits for a straggling exit before giving up
/// for this cycle. Mirrors the teacher's `ProcessHandle::finish` deadline
/// pattern; xtee's reap is already non-blocking (`try_wait`), so this mostly
/// guards against pathological repeated retries within one supervisor call.
const REAP_DEADLINE: Duration = Duration::from_millis(50);

/// Represents a spawned process and the three endpoints wired to it.
pub struct ChildStub {
    pub seq: usize,
    pub command_text: String,
    pub stdin: EndpointId,
    pub stdout: EndpointId,
    pub stderr: EndpointId,
    child: std::process::Child,
    pub alive: bool,
    pub last_status: Option<std::process::ExitStatus>,
}

impl ChildStub {
    pub fn endpoints(&self) -> [EndpointId; 3] {
        [self.stdin, self.stdout, self.stderr]
    }
}

pub struct ChildSupervisor {
    children: Vec<ChildStub>,
}

impl ChildSupervisor {
    pub fn new() -> Self {
        ChildSupervisor {
            children: Vec::new(),
        }
    }

    pub fn children(&self) -> &[ChildStub] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [ChildStub] {
        &mut self.children
    }

    /// Spawns every declared command in order, registering each one's three
    /// pipe ends in `registry`. The 1-based sequence number is assigned in
    /// declaration order, matching the `cmdNo` numbering link specs use.
    pub fn spawn_all(
        &mut self,
        spawner: &dyn ChildSpawner,
        registry: &mut EndpointRegistry,
        commands: &[String],
    ) -> Result<(), XteeError> {
        for (i, command_text) in commands.iter().enumerate() {
            let argv = crate::tokenize::tokenize(command_text);
            let spawned = spawner.spawn(&argv).map_err(|source| XteeError::SpawnFailed {
                index: i + 1,
                command: command_text.clone(),
                source,
            })?;

            let stdin = registry.register(spawned.stdin, EndpointRole::DestOnly);
            let stdout = registry.register(spawned.stdout, EndpointRole::SrcOnly);
            let stderr = registry.register(spawned.stderr, EndpointRole::SrcOnly);

            self.children.push(ChildStub {
                seq: i + 1,
                command_text: command_text.clone(),
                stdin,
                stdout,
                stderr,
                child: spawned.child,
                alive: true,
                last_status: None,
            });
        }
        Ok(())
    }

    /// Non-blockingly waits on every live child. Returns the endpoints of
    /// any child detected to have exited or disappeared this cycle, so the
    /// caller can run them through the registry's reference-counted close.
    pub fn reap_dead(&mut self, registry: &mut EndpointRegistry) -> Vec<[EndpointId; 3]> {
        let deadline = Deadline::new(REAP_DEADLINE);
        let mut newly_dead = Vec::new();

        for stub in self.children.iter_mut().filter(|c| c.alive) {
            if deadline.expired() {
                break;
            }
            match xtee_common::try_reap(&mut stub.child) {
                Ok(Some(status)) => {
                    stub.alive = false;
                    stub.last_status = Some(status);
                    newly_dead.push(stub.endpoints());
                }
                Ok(None) => {}
                Err(_) => {
                    // Treat a wait error the same as "gone": close its
                    // endpoints so the graph doesn't wait on it forever.
                    stub.alive = false;
                    newly_dead.push(stub.endpoints());
                }
            }
        }

        for endpoints in &newly_dead {
            for &id in endpoints {
                registry.close_source(id);
                registry.close_dest(id);
            }
        }

        newly_dead
    }

    /// Invoked on loop shutdown: closes every child's three endpoints
    /// through the graph (triggering cascaded closures) regardless of
    /// liveness, matching `closePipesToChild`.
    pub fn close_pipes_to_all(&mut self, registry: &mut EndpointRegistry) {
        for stub in &self.children {
            for &id in &stub.endpoints() {
                registry.close_source(id);
                registry.close_dest(id);
            }
        }
    }
}

impl Default for ChildSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::fake::RecordingSpawner;
    use std::os::unix::io::OwnedFd;
    use std::os::unix::net::UnixStream;

    fn harness(registry_stdin: UnixStream, registry_stdout: UnixStream, registry_stderr: UnixStream) -> EndpointRegistry {
        EndpointRegistry::with_harness_streams(
            OwnedFd::from(registry_stdin),
            OwnedFd::from(registry_stdout),
            OwnedFd::from(registry_stderr),
        )
    }

    #[test]
    fn spawn_all_assigns_one_based_sequence_numbers() {
        let (a, _) = UnixStream::pair().unwrap();
        let (b, _) = UnixStream::pair().unwrap();
        let (c, _) = UnixStream::pair().unwrap();
        let mut registry = harness(a, b, c);
        let spawner = RecordingSpawner::default();
        let mut supervisor = ChildSupervisor::new();

        supervisor
            .spawn_all(
                &spawner,
                &mut registry,
                &["cat".to_string(), "grep x".to_string()],
            )
            .unwrap();

        assert_eq!(supervisor.children().len(), 2);
        assert_eq!(supervisor.children()[0].seq, 1);
        assert_eq!(supervisor.children()[1].seq, 2);
        assert_eq!(spawner.invocations.borrow().len(), 2);
    }
}
