// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{release_block_index, GenericDevice, MAX_DEV_ID_SIZE};
use crate::{
    config::BlockDriver,
    device::{
        driver::{BlockConfig, DeviceConfig},
        Device, DeviceInfo, DeviceKind, FS_TYPE_OPT,
    },
    utils::{get_scsi_address, get_virt_drive_name, make_name_id},
    DeviceReceiver, Error, Result,
};

const DEFAULT_DRIVE_FORMAT: &str = "raw";

/// Block special file hot-plugged with the configured block driver.
pub struct BlockDevice {
    base: GenericDevice,
    driver: BlockDriver,
    drive: Option<BlockConfig>,
}

impl BlockDevice {
    pub fn new(id: &str, dev_info: &DeviceInfo, driver: BlockDriver) -> Self {
        Self {
            base: GenericDevice::new(id, dev_info),
            driver,
            drive: None,
        }
    }

    pub fn driver(&self) -> BlockDriver {
        self.driver
    }

    fn build_drive(&self, index: u64) -> Result<BlockConfig> {
        let info = self.base.device_info();
        let (major, minor) = info.major_minor().unwrap_or_default();
        let mut drive = BlockConfig {
            id: make_name_id("drive", self.base.device_id(), MAX_DEV_ID_SIZE),
            path_on_host: info.host_path.clone(),
            is_readonly: info.read_only,
            format: info
                .driver_option(FS_TYPE_OPT)
                .unwrap_or(DEFAULT_DRIVE_FORMAT)
                .to_string(),
            index,
            driver_option: self.driver,
            virt_path: None,
            scsi_addr: None,
            major,
            minor,
        };

        match self.driver {
            BlockDriver::VirtioScsi => drive.scsi_addr = Some(get_scsi_address(index)),
            BlockDriver::Nvdimm => {}
            BlockDriver::VirtioBlock | BlockDriver::VirtioBlockCcw => {
                drive.virt_path = Some(format!("/dev/{}", get_virt_drive_name(index)?));
            }
            // the rootfs of the VM itself sits at /dev/vda and consumes the
            // first index
            BlockDriver::VirtioMmio => {
                let index = index.checked_add(1).ok_or_else(|| {
                    Error::InvalidDeviceInfo(format!("block index {} out of range", index))
                })?;
                drive.virt_path = Some(format!("/dev/{}", get_virt_drive_name(index)?));
            }
        }

        Ok(drive)
    }
}

#[async_trait]
impl Device for BlockDevice {
    async fn attach(
        &mut self,
        token: &CancellationToken,
        r: &Arc<dyn DeviceReceiver>,
    ) -> Result<()> {
        let skip = self.base.bump_attach_count(true, r)?;
        if skip {
            return Ok(());
        }

        // Increment the block index for the sandbox. This is used to determine
        // the name of the block device in the guest.
        let index = r
            .get_and_set_block_index()
            .await
            .map_err(|e| self.base.attach_error(e))?;

        let drive = match self.build_drive(index) {
            Ok(drive) => drive,
            Err(e) => {
                release_block_index(r, self.base.device_id(), index).await;
                return Err(e);
            }
        };

        info!(sl!(), "attaching {} device", self.driver;
            "device" => &drive.path_on_host,
            "virt-path" => drive.virt_path.as_deref().unwrap_or_default(),
            "index" => index);
        if let Err(e) = r.hot_attach(token, &DeviceConfig::Block(drive.clone())).await {
            error!(sl!(), "failed to attach block device {}: {:?}", drive.path_on_host, e);
            release_block_index(r, self.base.device_id(), index).await;
            return Err(self.base.attach_error(e));
        }

        self.drive = Some(drive);
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

        let (drive_id, index) = match self.drive.as_ref() {
            Some(drive) => (drive.id.clone(), drive.index),
            None => return Err(Error::NotAttached(self.base.device_id().to_string())),
        };

        info!(sl!(), "unplugging block device"; "device" => &self.base.device_info().host_path);
        if let Err(e) = r.hot_detach(token, &drive_id).await {
            error!(sl!(), "failed to unplug block device {}: {:?}", drive_id, e);
            return Err(self.base.detach_error(e));
        }

        release_block_index(r, self.base.device_id(), index).await;
        self.drive = None;
        self.base.commit_detach();
        Ok(())
    }

    fn hotplug_config(&self) -> Option<DeviceConfig> {
        self.drive.clone().map(DeviceConfig::Block)
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Block
    }

    fn base(&self) -> &GenericDevice {
        &self.base
    }
}
