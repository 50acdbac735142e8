// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::GenericDevice;
use crate::{
    device::{
        driver::{DeviceConfig, VhostUserConfig, VhostUserType},
        Device, DeviceInfo, DeviceKind, MAC_ADDRESS_OPT,
    },
    utils::generate_random_hex,
    DeviceReceiver, Error, Result,
};

/// vhost-user net endpoint registered by its control socket.
pub struct VhostUserNetDevice {
    base: GenericDevice,
    attrs: Option<VhostUserConfig>,
}

impl VhostUserNetDevice {
    pub fn new(id: &str, dev_info: &DeviceInfo) -> Self {
        Self {
            base: GenericDevice::new(id, dev_info),
            attrs: None,
        }
    }
}

#[async_trait]
impl Device for VhostUserNetDevice {
    async fn attach(
        &mut self,
        token: &CancellationToken,
        r: &Arc<dyn DeviceReceiver>,
    ) -> Result<()> {
        let skip = self.base.bump_attach_count(true, r)?;
        if skip {
            return Ok(());
        }

        let info = self.base.device_info();
        let attrs = VhostUserConfig {
            dev_id: generate_random_hex(8),
            socket_path: info.host_path.clone(),
            mac_address: info.driver_option(MAC_ADDRESS_OPT).map(String::from),
            device_type: VhostUserType::Net,
            index: None,
        };

        info!(sl!(), "attaching vhost-user-net device"; "socket-path" => &attrs.socket_path);
        r.hot_attach(token, &DeviceConfig::VhostUserNet(attrs.clone()))
            .await
            .map_err(|e| self.base.attach_error(e))?;

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

        let dev_id = match self.attrs.as_ref() {
            Some(attrs) => attrs.dev_id.clone(),
            None => return Err(Error::NotAttached(self.base.device_id().to_string())),
        };
        r.hot_detach(token, &dev_id)
            .await
            .map_err(|e| self.base.detach_error(e))?;

        self.attrs = None;
        self.base.commit_detach();
        Ok(())
    }

    fn hotplug_config(&self) -> Option<DeviceConfig> {
        self.attrs.clone().map(DeviceConfig::VhostUserNet)
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::VhostUserNet
    }

    fn base(&self) -> &GenericDevice {
        &self.base
    }
}
