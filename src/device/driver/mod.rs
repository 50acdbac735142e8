// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

mod vfio;
mod vhost_user;
mod virtio_blk;

pub use vfio::VfioConfig;
pub use vhost_user::{VhostUserConfig, VhostUserType};
pub use virtio_blk::BlockConfig;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Hot-plug request handed to a [`DeviceReceiver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceConfig {
    Block(BlockConfig),
    VhostUserBlk(VhostUserConfig),
    VhostUserNet(VhostUserConfig),
    Vfio(VfioConfig),
}

/// The sandbox side of hot-plug.
///
/// Implemented by the sandbox layer, which forwards the requests to the
/// hypervisor. Both hot-plug calls may block on hypervisor I/O; once started
/// they run to completion even if `token` is cancelled meanwhile.
#[async_trait]
pub trait DeviceReceiver: Send + Sync {
    // hot_attach plugs the device into the running VM
    async fn hot_attach(&self, token: &CancellationToken, config: &DeviceConfig) -> Result<()>;
    // hot_detach unplugs the device known to the VM as `device_id`
    async fn hot_detach(&self, token: &CancellationToken, device_id: &str) -> Result<()>;
    // get_and_set_block_index reserves the next free block index of the sandbox
    async fn get_and_set_block_index(&self) -> Result<u64>;
    // unset_block_index releases a block index
    async fn unset_block_index(&self, index: u64) -> Result<()>;
}
