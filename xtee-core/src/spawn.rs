// Copyright 2021-Present
// SPDX-License-Identifier: Apache-2.0

//! The process-spawning trait boundary. Spawning happens on the ordinary
//! event-loop thread rather than inside a signal handler, so — unlike the
//! async-signal-safe `vfork`/`execve` dance this crate's process-handling
//! code is grounded on — the production implementation can simply use
//! `std::process::Command` with three piped descriptors.

use std::io;
use std::os::unix::io::OwnedFd;
use std::process::{Child, Command, Stdio};

/// A spawned child's three pipe ends, as seen by the parent: the write end
/// of its stdin, and the read ends of its stdout/stderr.
pub struct SpawnedChild {
    pub child: Child,
    pub stdin: OwnedFd,
    pub stdout: OwnedFd,
    pub stderr: OwnedFd,
}

/// Creates a child process with three connected pipe endpoints. Exists as a
/// trait so event-loop and supervisor tests can substitute a fake that
/// records invocations without touching the OS process table.
pub trait ChildSpawner {
    fn spawn(&self, argv: &[String]) -> io::Result<SpawnedChild>;
}

/// Production spawner: one `fork`/`exec` per child via `std::process::Command`.
#[derive(Debug, Default)]
pub struct StdChildSpawner;

impl ChildSpawner for StdChildSpawner {
    fn spawn(&self, argv: &[String]) -> io::Result<SpawnedChild> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .expect("stdin was requested as piped")
            .into();
        let stdout = child
            .stdout
            .take()
            .expect("stdout was requested as piped")
            .into();
        let stderr = child
            .stderr
            .take()
            .expect("stderr was requested as piped")
            .into();

        Ok(SpawnedChild {
            child,
            stdin,
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::cell::RefCell;
    use std::os::unix::net::UnixStream;

    /// Records every `argv` it was asked to spawn and hands back a real
    /// process (`cat`) wired to freshly created socket pairs, so tests can
    /// exercise the engine's I/O paths without depending on the specific
    /// command under test.
    #[derive(Default)]
    pub struct RecordingSpawner {
        pub invocations: RefCell<Vec<Vec<String>>>,
    }

    impl ChildSpawner for RecordingSpawner {
        fn spawn(&self, argv: &[String]) -> io::Result<SpawnedChild> {
            self.invocations.borrow_mut().push(argv.to_vec());
            let child = Command::new("cat").spawn()?;
            let (stdin, _stdin_peer) = UnixStream::pair()?;
            let (stdout, _stdout_peer) = UnixStream::pair()?;
            let (stderr, _stderr_peer) = UnixStream::pair()?;
            Ok(SpawnedChild {
                child,
                stdin: stdin.into(),
                stdout: stdout.into(),
                stderr: stderr.into(),
            })
        }
    }
}
