// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{GenericDevice, MAX_DEV_ID_SIZE};
use crate::{
    device::{
        driver::{DeviceConfig, VfioConfig},
        Device, DeviceInfo, DeviceKind,
    },
    utils::make_name_id,
    DeviceReceiver, Result,
};

/// Lists the devices (BDFs) of an IOMMU group, sorted.
pub async fn iommu_group_devices(iommu_groups: &Path, group: &str) -> io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(iommu_groups.join(group).join("devices")).await?;
    let mut bdfs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        bdfs.push(entry.file_name().to_string_lossy().into_owned());
    }
    bdfs.sort();
    Ok(bdfs)
}

/// Passthrough device: a whole VFIO group handed to the guest.
pub struct VfioDevice {
    base: GenericDevice,
    iommu_group: String,
    iommu_groups_path: PathBuf,
    config: Option<VfioConfig>,
}

impl VfioDevice {
    pub fn new(
        id: &str,
        dev_info: &DeviceInfo,
        iommu_group: &str,
        iommu_groups_path: &Path,
    ) -> Self {
        Self {
            base: GenericDevice::new(id, dev_info),
            iommu_group: iommu_group.to_string(),
            iommu_groups_path: iommu_groups_path.to_path_buf(),
            config: None,
        }
    }

    pub fn iommu_group(&self) -> &str {
        &self.iommu_group
    }
}

#[async_trait]
impl Device for VfioDevice {
    async fn attach(
        &mut self,
        token: &CancellationToken,
        r: &Arc<dyn DeviceReceiver>,
    ) -> Result<()> {
        let skip = self.base.bump_attach_count(true, r)?;
        if skip {
            return Ok(());
        }

        let bdfs = iommu_group_devices(&self.iommu_groups_path, &self.iommu_group)
            .await
            .with_context(|| format!("read devices of iommu group {}", self.iommu_group))
            .map_err(|e| self.base.attach_error(e))?;
        if bdfs.is_empty() {
            return Err(self
                .base
                .attach_error(anyhow!("iommu group {} has no devices", self.iommu_group)));
        }

        let config = VfioConfig {
            id: make_name_id("vfio", self.base.device_id(), MAX_DEV_ID_SIZE),
            host_path: self.base.device_info().host_path.clone(),
            iommu_group: self.iommu_group.clone(),
            bdfs,
        };
        info!(sl!(), "attaching vfio device";
            "group" => &config.iommu_group,
            "bdfs" => ?config.bdfs);
        r.hot_attach(token, &DeviceConfig::Vfio(config.clone()))
            .await
            .map_err(|e| self.base.attach_error(e))?;

        self.config = Some(config);
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

        let id = match self.config.as_ref() {
            Some(config) => config.id.clone(),
            None => return Err(crate::Error::NotAttached(self.base.device_id().to_string())),
        };
        r.hot_detach(token, &id).await.map_err(|e| {
            error!(sl!(), "failed to unplug vfio device {}: {:?}", id, e);
            self.base.detach_error(e)
        })?;

        self.config = None;
        self.base.commit_detach();
        Ok(())
    }

    fn hotplug_config(&self) -> Option<DeviceConfig> {
        self.config.clone().map(DeviceConfig::Vfio)
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Vfio
    }

    fn base(&self) -> &GenericDevice {
        &self.base
    }
}
