// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{release_block_index, GenericDevice};
use crate::{
    device::{
        driver::{DeviceConfig, VhostUserConfig, VhostUserType},
        vhost_user_store::VhostUserBlkPaths,
        Device, DeviceInfo, DeviceKind,
    },
    utils::generate_random_hex,
    DeviceReceiver, Error, Result,
};

// VhostUserBlkDevice is a block vhost-user based device
pub struct VhostUserBlkDevice {
    base: GenericDevice,
    paths: VhostUserBlkPaths,
    attrs: Option<VhostUserConfig>,
}

impl VhostUserBlkDevice {
    pub fn new(id: &str, dev_info: &DeviceInfo, paths: VhostUserBlkPaths) -> Self {
        Self {
            base: GenericDevice::new(id, dev_info),
            paths,
            attrs: None,
        }
    }

    /// Device node and control socket backing this device.
    pub fn paths(&self) -> &VhostUserBlkPaths {
        &self.paths
    }
}

#[async_trait]
impl Device for VhostUserBlkDevice {
    async fn attach(
        &mut self,
        token: &CancellationToken,
        r: &Arc<dyn DeviceReceiver>,
    ) -> Result<()> {
        let skip = self.base.bump_attach_count(true, r)?;
        if skip {
            return Ok(());
        }

        let index = r
            .get_and_set_block_index()
            .await
            .map_err(|e| self.base.attach_error(e))?;

        // generate a unique ID to be used for hypervisor commandline fields
        let attrs = VhostUserConfig {
            dev_id: generate_random_hex(8),
            socket_path: self.paths.socket.display().to_string(),
            mac_address: None,
            device_type: VhostUserType::Blk,
            index: Some(index),
        };

        info!(sl!(), "attaching vhost-user-blk device";
            "device" => self.paths.node.display().to_string(),
            "socket-path" => &attrs.socket_path,
            "index" => index);
        if let Err(e) = r
            .hot_attach(token, &DeviceConfig::VhostUserBlk(attrs.clone()))
            .await
        {
            error!(sl!(), "failed to attach vhost-user-blk device {}: {:?}", attrs.socket_path, e);
            release_block_index(r, self.base.device_id(), index).await;
            return Err(self.base.attach_error(e));
        }

        self.attrs = Some(attrs);
        self.base.commit_attach(r);
        Ok(())
    }

    async fn detach(
        &mut self,
        token: &CancellationToken,
        r: &Arc<dyn DeviceReceiver>,
    ) -> Result<()> {
        let skip = self.base.bump_attach_count(false, r)?;
        if skip {
            return Ok(());
        }

        let (dev_id, index) = match self.attrs.as_ref() {
            Some(attrs) => (attrs.dev_id.clone(), attrs.index),
            None => return Err(Error::NotAttached(self.base.device_id().to_string())),
        };

        info!(sl!(), "unplugging vhost-user-blk device"; "dev-id" => &dev_id);
        if let Err(e) = r.hot_detach(token, &dev_id).await {
            error!(sl!(), "failed to unplug vhost-user-blk device {}: {:?}", dev_id, e);
            return Err(self.base.detach_error(e));
        }

        if let Some(index) = index {
            release_block_index(r, self.base.device_id(), index).await;
        }
        self.attrs = None;
        self.base.commit_detach();
        Ok(())
    }

    fn hotplug_config(&self) -> Option<DeviceConfig> {
        self.attrs.clone().map(DeviceConfig::VhostUserBlk)
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::VhostUserBlk
    }

    fn base(&self) -> &GenericDevice {
        &self.base
    }
}
