// Copyright 2021-Present
// SPDX-License-Identifier: Apache-2.0

//! Bookkeeping for open byte endpoints: owns the actual file handles, their
//! roles, and the reserved bit, and composes [`LinkGraph`] so that
//! reference-counted closure turns into real fd teardown.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, OwnedFd};

use crate::error::LinkError;
use crate::graph::{EndpointId, LinkGraph};

/// Harness stdin/stdout/stderr, fixed by the standard fd numbering.
pub const HARNESS_STDIN: EndpointId = 0;
pub const HARNESS_STDOUT: EndpointId = 1;
pub const HARNESS_STDERR: EndpointId = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    SrcOnly,
    DestOnly,
    SrcAndDest,
}

impl EndpointRole {
    pub fn can_be_source(self) -> bool {
        matches!(self, EndpointRole::SrcOnly | EndpointRole::SrcAndDest)
    }

    pub fn can_be_dest(self) -> bool {
        matches!(self, EndpointRole::DestOnly | EndpointRole::SrcAndDest)
    }
}

struct Endpoint {
    role: EndpointRole,
    reserved: bool,
    file: File,
}

/// Owns every open endpoint plus the link graph between them. This is the
/// one place where a graph closure translates into an actual `close(2)`
/// (via `File`'s `Drop`).
pub struct EndpointRegistry {
    endpoints: HashMap<EndpointId, Endpoint>,
    graph: LinkGraph,
    reserved: HashSet<EndpointId>,
}

impl EndpointRegistry {
    /// Constructs a registry pre-populated with the three harness endpoints,
    /// all reserved and all `SrcAndDest` (the harness's own streams can be
    /// linked as either side, per the data model).
    pub fn with_harness_streams(stdin: OwnedFd, stdout: OwnedFd, stderr: OwnedFd) -> Self {
        let mut reg = EndpointRegistry {
            endpoints: HashMap::new(),
            graph: LinkGraph::new(),
            reserved: HashSet::new(),
        };
        reg.insert_reserved(HARNESS_STDIN, stdin);
        reg.insert_reserved(HARNESS_STDOUT, stdout);
        reg.insert_reserved(HARNESS_STDERR, stderr);
        reg
    }

    fn insert_reserved(&mut self, id: EndpointId, fd: OwnedFd) {
        self.reserved.insert(id);
        self.endpoints.insert(
            id,
            Endpoint {
                role: EndpointRole::SrcAndDest,
                reserved: true,
                file: File::from(fd),
            },
        );
    }

    /// Registers a freshly opened, non-reserved endpoint (a child's pipe
    /// end). `id` is the owned fd's raw value, used as the graph key exactly
    /// as the original keys its maps by the literal integer descriptor.
    pub fn register(&mut self, fd: OwnedFd, role: EndpointRole) -> EndpointId {
        let id = fd.as_raw_fd();
        self.endpoints.insert(
            id,
            Endpoint {
                role,
                reserved: false,
                file: File::from(fd),
            },
        );
        id
    }

    pub fn is_reserved(&self, id: EndpointId) -> bool {
        self.reserved.contains(&id)
    }

    pub fn is_open(&self, id: EndpointId) -> bool {
        self.endpoints.contains_key(&id)
    }

    pub fn role(&self, id: EndpointId) -> Option<EndpointRole> {
        self.endpoints.get(&id).map(|e| e.role)
    }

    pub fn destinations_of(&self, s: EndpointId) -> Vec<EndpointId> {
        self.graph
            .destinations_of(s)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn has_any_source(&self) -> bool {
        self.graph.has_sources()
    }

    /// Whether any source currently feeds `d`. Used to re-derive the "is a
    /// child still feeding the harness's input" check live from the graph
    /// instead of a counter that would otherwise need to be kept in sync
    /// with every child death.
    pub fn has_sources_for(&self, d: EndpointId) -> bool {
        self.graph.sources_of(d).is_some_and(|s| !s.is_empty())
    }

    pub fn source_ids(&self) -> impl Iterator<Item = EndpointId> + '_ {
        self.graph.source_ids()
    }

    pub fn read(&mut self, id: EndpointId, buf: &mut [u8]) -> io::Result<usize> {
        let endpoint = self
            .endpoints
            .get_mut(&id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "endpoint already closed"))?;
        endpoint.file.read(buf)
    }

    pub fn write(&mut self, id: EndpointId, buf: &[u8]) -> io::Result<()> {
        let endpoint = self
            .endpoints
            .get_mut(&id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "endpoint already closed"))?;
        endpoint.file.write_all(buf)
    }

    pub fn flush(&mut self, id: EndpointId) -> io::Result<()> {
        if let Some(endpoint) = self.endpoints.get_mut(&id) {
            endpoint.file.flush()?;
        }
        Ok(())
    }

    /// Inserts `d` into `fwd[s]` and `s` into `rev[d]`, after validating
    /// roles and rejecting self-loops/negative ids.
    pub fn link(&mut self, s: EndpointId, d: EndpointId) -> Result<(), LinkError> {
        if s < 0 {
            return Err(LinkError::NegativeEndpoint { endpoint: s });
        }
        if d < 0 {
            return Err(LinkError::NegativeEndpoint { endpoint: d });
        }
        if s == d {
            return Err(LinkError::SelfLoop { endpoint: s });
        }
        if let Some(role) = self.role(s) {
            if !role.can_be_source() {
                return Err(LinkError::BadSourceFd { spec: format!("{s}"), fd: s as u32 });
            }
        }
        if let Some(role) = self.role(d) {
            if !role.can_be_dest() {
                return Err(LinkError::BadTargetFd { spec: format!("{d}"), fd: d as u32 });
            }
        }
        self.graph.link(s, d);
        Ok(())
    }

    pub fn unlink(&mut self, s: EndpointId, d: EndpointId) {
        self.graph.unlink(s, d);
    }

    /// Closes `s` per the reference-counted rule, physically dropping every
    /// endpoint the graph reports as now-unreferenced (skipping reserved
    /// ones, which the graph already excludes from its report).
    pub fn close_source(&mut self, s: EndpointId) {
        let closed = self.graph.close_source(s, &self.reserved);
        for id in closed {
            self.endpoints.remove(&id);
        }
    }

    pub fn close_dest(&mut self, d: EndpointId) {
        let closed = self.graph.close_dest(d, &self.reserved);
        for id in closed {
            self.endpoints.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    fn harness_fds() -> (OwnedFd, OwnedFd, OwnedFd) {
        let (a, _b) = UnixStream::pair().unwrap();
        let (c, _d) = UnixStream::pair().unwrap();
        let (e, _f) = UnixStream::pair().unwrap();
        (a.into(), c.into(), e.into())
    }

    #[test]
    fn reserved_streams_are_registered_and_marked_reserved() {
        let (stdin, stdout, stderr) = harness_fds();
        let reg = EndpointRegistry::with_harness_streams(stdin, stdout, stderr);
        assert!(reg.is_reserved(HARNESS_STDIN));
        assert!(reg.is_reserved(HARNESS_STDOUT));
        assert!(reg.is_reserved(HARNESS_STDERR));
        assert!(reg.is_open(HARNESS_STDIN));
    }

    #[test]
    fn close_source_never_drops_reserved_destination() {
        let (stdin, stdout, stderr) = harness_fds();
        let mut reg = EndpointRegistry::with_harness_streams(stdin, stdout, stderr);
        let (child_out, _peer) = UnixStream::pair().unwrap();
        let child_out_id = reg.register(child_out.into(), EndpointRole::SrcOnly);
        reg.link(child_out_id, HARNESS_STDOUT).unwrap();
        reg.close_source(child_out_id);
        assert!(!reg.is_open(child_out_id));
        assert!(reg.is_open(HARNESS_STDOUT));
    }

    #[test]
    fn rejects_self_loop() {
        let (stdin, stdout, stderr) = harness_fds();
        let mut reg = EndpointRegistry::with_harness_streams(stdin, stdout, stderr);
        assert!(matches!(
            reg.link(HARNESS_STDIN, HARNESS_STDIN),
            Err(LinkError::SelfLoop { .. })
        ));
    }
}
