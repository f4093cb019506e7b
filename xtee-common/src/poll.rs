// Copyright 2021-Present
// SPDX-License-Identifier: Apache-2.0

//! A `poll(2)`-backed readiness primitive.
//!
//! Generalizes the single-fd `POLLHUP` wait used elsewhere in this pack's
//! process-supervision code (poll one fd, block until it hangs up or a
//! timeout fires) to an arbitrary set of fds, each reported as readable
//! and/or in an error state.

use std::os::unix::io::RawFd;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum PollWaitError {
    #[error("poll(2) failed with errno: {0}")]
    Errno(Errno),
}

/// Readiness observed for one watched fd after a `poll` cycle.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub fd: RawFd,
    pub readable: bool,
    /// Set on `POLLERR`, `POLLHUP`, or `POLLNVAL` — any condition the spec
    /// treats as "error-readiness" and that should trigger endpoint closure
    /// rather than a read attempt.
    pub errored: bool,
}

/// Waits up to `timeout` for any of `fds` to become readable or to report an
/// error condition. Returns one [`Readiness`] per fd in `fds`, in the same
/// order, regardless of whether anything happened to it.
///
/// Retries internally on `EINTR`/`EAGAIN`, matching the retry loop this pack
/// uses around its own raw `poll(2)` calls.
pub fn wait(fds: &[RawFd], timeout: Duration) -> Result<Vec<Readiness>, PollWaitError> {
    let mut pollfds: Vec<PollFd> = fds
        .iter()
        .map(|&fd| {
            // Safety: the fd is owned by the caller for at least the
            // duration of this call; PollFd does not take ownership.
            let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
            PollFd::new(borrowed, PollFlags::POLLIN)
        })
        .collect();

    let timeout = PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX);

    loop {
        match poll(&mut pollfds, timeout) {
            Ok(_) => break,
            Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
            Err(e) => return Err(PollWaitError::Errno(e)),
        }
    }

    Ok(fds
        .iter()
        .zip(pollfds.iter())
        .map(|(&fd, pfd)| {
            let revents = pfd.revents().unwrap_or(PollFlags::empty());
            Readiness {
                fd,
                readable: revents.intersects(PollFlags::POLLIN),
                errored: revents
                    .intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn reports_readable_after_write() {
        let (mut a, b) = UnixStream::pair().unwrap();
        a.write_all(b"x").unwrap();
        let events = wait(&[b.as_raw_fd()], Duration::from_millis(200)).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].readable);
        assert!(!events[0].errored);
    }

    #[test]
    fn reports_hangup_after_peer_drop() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(a);
        let events = wait(&[b.as_raw_fd()], Duration::from_millis(200)).unwrap();
        assert!(events[0].readable || events[0].errored);
    }

    #[test]
    fn times_out_with_no_activity() {
        let (_a, b) = UnixStream::pair().unwrap();
        let events = wait(&[b.as_raw_fd()], Duration::from_millis(50)).unwrap();
        assert!(!events[0].readable);
        assert!(!events[0].errored);
    }
}
