// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! Inspection of host device nodes.
//!
//! The device manager holds its prober as a capability so that tests can
//! describe device nodes which an unprivileged user cannot create with mknod.

use std::{io, path::Path};

use nix::sys::stat::{self, SFlag};

/// File type of a probed host path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Block,
    Char,
    Socket,
    Other,
}

impl NodeType {
    pub fn is_block_or_char(&self) -> bool {
        matches!(self, NodeType::Block | NodeType::Char)
    }
}

/// Result of probing a host path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStat {
    pub node_type: NodeType,
    pub major: u64,
    pub minor: u64,
}

pub trait NodeProber: Send + Sync {
    fn probe(&self, path: &Path) -> io::Result<NodeStat>;
}

/// Prober backed by stat(2).
#[derive(Debug, Default, Clone, Copy)]
pub struct HostNodeProber;

impl NodeProber for HostNodeProber {
    fn probe(&self, path: &Path) -> io::Result<NodeStat> {
        let fstat = stat::stat(path).map_err(io::Error::from)?;
        let fmt = SFlag::from_bits_truncate(fstat.st_mode & SFlag::S_IFMT.bits());
        let node_type = if fmt == SFlag::S_IFBLK {
            NodeType::Block
        } else if fmt == SFlag::S_IFCHR {
            NodeType::Char
        } else if fmt == SFlag::S_IFSOCK {
            NodeType::Socket
        } else {
            NodeType::Other
        };
        // only special files carry meaningful device numbers
        let (major, minor) = if node_type.is_block_or_char() {
            (stat::major(fstat.st_rdev), stat::minor(fstat.st_rdev))
        } else {
            (0, 0)
        };

        Ok(NodeStat {
            node_type,
            major,
            minor,
        })
    }
}
