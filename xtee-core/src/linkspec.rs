// Copyright 2021-Present
// SPDX-License-Identifier: Apache-2.0

//! Parses `-l DEST:SRC` link specifications and builds the initial graph,
//! then auto-links every child endpoint the explicit specs left untouched.
//!
//! Ported from the validation and linking order in `checkAndForward`'s
//! sibling setup code in `xtee.cc`: the destination side defaults its
//! (always-zero) fd when no `cmdNo.fd` dot is present, while the source side
//! defaults its *command number* to the harness when no dot is present —
//! these two "bare form" defaults are asymmetric on purpose, carried over
//! verbatim rather than made symmetric, since link specs in the wild rely on
//! the asymmetry (a bare target is "child N's stdin", a bare source is
//! "harness fd N").

use crate::child::ChildStub;
use crate::endpoint::{EndpointRegistry, HARNESS_STDERR, HARNESS_STDIN, HARNESS_STDOUT};
use crate::error::LinkError;
use crate::graph::EndpointId;

const FD_STDIN: u32 = 0;
const FD_STDOUT: u32 = 1;
const FD_STDERR: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Side {
    cmd_no: usize,
    fd: u32,
}

fn parse_dest_side(token: &str) -> Option<Side> {
    match token.split_once('.') {
        Some((id, fd)) => Some(Side {
            cmd_no: id.parse().ok()?,
            fd: fd.parse().ok()?,
        }),
        None => Some(Side {
            cmd_no: token.parse().ok()?,
            fd: FD_STDIN,
        }),
    }
}

fn parse_src_side(token: &str) -> Option<Side> {
    match token.split_once('.') {
        Some((id, fd)) => Some(Side {
            cmd_no: id.parse().ok()?,
            fd: fd.parse().ok()?,
        }),
        None => Some(Side {
            cmd_no: 0,
            fd: token.parse().ok()?,
        }),
    }
}

/// Result of resolving one explicit `-l` spec against the declared children.
enum Resolution {
    /// A concrete edge to install.
    Edge { src: EndpointId, dest: EndpointId },
    /// Syntactically valid but not an edge the original ever links (a bare
    /// source naming the harness's own error stream). Silently dropped,
    /// matching the `else continue` fallthrough in the source this is
    /// ported from.
    Inert,
}

fn resolve(
    spec: &str,
    dest: Side,
    src: Side,
    children: &[ChildStub],
) -> Result<Resolution, LinkError> {
    let child_count = children.len();

    if dest.cmd_no > child_count || src.cmd_no > child_count {
        return Err(LinkError::CmdNoOutOfRange {
            spec: spec.to_string(),
            cmd_no: dest.cmd_no.max(src.cmd_no),
            child_count,
        });
    }
    if dest.fd != FD_STDIN {
        return Err(LinkError::BadTargetFd {
            spec: spec.to_string(),
            fd: dest.fd,
        });
    }
    if src.fd != FD_STDOUT && src.fd != FD_STDERR {
        return Err(LinkError::BadSourceFd {
            spec: spec.to_string(),
            fd: src.fd,
        });
    }

    let dest_id: EndpointId = if dest.cmd_no > 0 {
        children[dest.cmd_no - 1].stdin
    } else {
        HARNESS_STDIN
    };

    if src.cmd_no > 0 {
        let child = &children[src.cmd_no - 1];
        let src_id = if src.fd == FD_STDOUT { child.stdout } else { child.stderr };
        Ok(Resolution::Edge { src: src_id, dest: dest_id })
    } else if src.fd == FD_STDOUT {
        Ok(Resolution::Edge { src: HARNESS_STDIN, dest: dest_id })
    } else {
        Ok(Resolution::Inert)
    }
}

/// Installs every explicit `-l` spec, returning the number of links that
/// landed a child's output onto the harness's own input (the
/// `children_feeding_stdin` counter that governs EOF policy in the event
/// loop). Invalid specs are logged at the `ERROR` category and skipped —
/// they never abort the run.
pub fn build_explicit_links(
    specs: &[String],
    registry: &mut EndpointRegistry,
    children: &[ChildStub],
) -> usize {
    let mut children_feeding_stdin = 0;

    for spec in specs {
        let Some((dest_tok, src_tok)) = spec.split_once(':') else {
            log::error!("skip invalid link: {}", LinkError::Malformed { spec: spec.clone() });
            continue;
        };

        let (Some(dest), Some(src)) = (parse_dest_side(dest_tok), parse_src_side(src_tok)) else {
            log::error!("skip invalid link: {}", LinkError::Malformed { spec: spec.clone() });
            continue;
        };

        match resolve(spec, dest, src, children) {
            Ok(Resolution::Edge { src: src_id, dest: dest_id }) => {
                if let Err(err) = registry.link(src_id, dest_id) {
                    log::error!("skip invalid link {spec:?}: {err}");
                    continue;
                }
                if dest_id == HARNESS_STDIN {
                    children_feeding_stdin += 1;
                }
            }
            Ok(Resolution::Inert) => {}
            Err(err) => log::error!("skip invalid link {spec:?}: {err}"),
        }
    }

    children_feeding_stdin
}

/// Auto-links every child endpoint the explicit specs left untouched: output
/// to the harness's output, error to the harness's error. The harness's own
/// input is never auto-linked to any child's input.
pub fn apply_orphan_defaults(registry: &mut EndpointRegistry, children: &[ChildStub]) {
    for child in children {
        if registry.destinations_of(child.stdout).is_empty() {
            let _ = registry.link(child.stdout, HARNESS_STDOUT);
        }
        if registry.destinations_of(child.stderr).is_empty() {
            let _ = registry.link(child.stderr, HARNESS_STDERR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_dest_defaults_fd_to_stdin_bare_src_defaults_cmd_to_harness() {
        assert_eq!(parse_dest_side("2"), Some(Side { cmd_no: 2, fd: FD_STDIN }));
        assert_eq!(parse_src_side("1"), Some(Side { cmd_no: 0, fd: 1 }));
        assert_eq!(parse_dest_side("1.0"), Some(Side { cmd_no: 1, fd: 0 }));
        assert_eq!(parse_src_side("1.1"), Some(Side { cmd_no: 1, fd: 1 }));
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert_eq!(parse_dest_side("x"), None);
        assert_eq!(parse_src_side("1.y"), None);
    }
}
