// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! Layout of the vhost-user store.
//!
//! A vhost-user block device `B` is published under the store root `R` as a
//! device node `R/block/devices/B` and its control socket `R/block/sockets/B`.
//! The store is owned by the vhost-user backend; it is only read here.

use std::{
    ffi::{OsStr, OsString},
    fs,
    path::{Path, PathBuf},
};

use crate::probe::NodeProber;

/// Major number reserved for vhost-user-blk device nodes.
pub const VHOST_USER_BLK_MAJOR: u64 = 241;

const VHOST_USER_BLK_DEVICES_DIR: &str = "block/devices";
const VHOST_USER_BLK_SOCKETS_DIR: &str = "block/sockets";

pub fn vhost_user_blk_devices_dir(store: &Path) -> PathBuf {
    store.join(VHOST_USER_BLK_DEVICES_DIR)
}

pub fn vhost_user_blk_sockets_dir(store: &Path) -> PathBuf {
    store.join(VHOST_USER_BLK_SOCKETS_DIR)
}

/// Device node and control socket of a vhost-user block device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VhostUserBlkPaths {
    pub node: PathBuf,
    pub socket: PathBuf,
}

fn paired_paths(store: &Path, name: &OsStr) -> Option<VhostUserBlkPaths> {
    let node = vhost_user_blk_devices_dir(store).join(name);
    let socket = vhost_user_blk_sockets_dir(store).join(name);
    if node.exists() && socket.exists() {
        Some(VhostUserBlkPaths { node, socket })
    } else {
        None
    }
}

/// Scans the store's device directory for the node numbered `major:minor`.
pub fn find_vhost_user_blk_node(
    prober: &dyn NodeProber,
    store: &Path,
    major: u64,
    minor: u64,
) -> Option<OsString> {
    let entries = fs::read_dir(vhost_user_blk_devices_dir(store)).ok()?;
    for entry in entries.flatten() {
        match prober.probe(&entry.path()) {
            Ok(stat) if stat.major == major && stat.minor == minor => {
                return Some(entry.file_name())
            }
            _ => continue,
        }
    }
    None
}

/// Looks up the vhost-user block device behind `host_path`.
///
/// The basename of `host_path` names the device. When the store has no
/// complete pair under that name, the device node numbered `major:minor` is
/// searched instead. Both the node and the socket must exist.
pub fn lookup_vhost_user_blk(
    prober: &dyn NodeProber,
    store: &Path,
    host_path: &Path,
    major: u64,
    minor: u64,
) -> Option<VhostUserBlkPaths> {
    if let Some(paths) = host_path
        .file_name()
        .and_then(|name| paired_paths(store, name))
    {
        return Some(paths);
    }

    let name = find_vhost_user_blk_node(prober, store, major, minor)?;
    paired_paths(store, &name)
}
