// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

use std::{fmt, fs, path::Path, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default root of the vhost-user store.
pub const DEFAULT_VHOST_USER_STORE_PATH: &str = "/var/run/kata-containers/vhost-user";
/// Default sysfs directory listing IOMMU groups.
pub const DEFAULT_IOMMU_GROUPS_PATH: &str = "/sys/kernel/iommu_groups";

/// Block driver used to hot-plug generic block devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockDriver {
    /// virtio-blk over PCI
    #[serde(rename = "virtio-blk")]
    VirtioBlock,
    /// virtio-blk over CCW (s390x)
    #[serde(rename = "virtio-blk-ccw")]
    VirtioBlockCcw,
    /// virtio-blk over MMIO, the VM rootfs takes the first drive
    #[serde(rename = "virtio-mmio")]
    VirtioMmio,
    #[serde(rename = "virtio-scsi")]
    VirtioScsi,
    #[serde(rename = "nvdimm")]
    Nvdimm,
}

impl BlockDriver {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockDriver::VirtioBlock => "virtio-blk",
            BlockDriver::VirtioBlockCcw => "virtio-blk-ccw",
            BlockDriver::VirtioMmio => "virtio-mmio",
            BlockDriver::VirtioScsi => "virtio-scsi",
            BlockDriver::Nvdimm => "nvdimm",
        }
    }
}

impl Default for BlockDriver {
    fn default() -> Self {
        BlockDriver::VirtioScsi
    }
}

impl fmt::Display for BlockDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockDriver {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "virtio-blk" => Ok(BlockDriver::VirtioBlock),
            "virtio-blk-ccw" => Ok(BlockDriver::VirtioBlockCcw),
            "virtio-mmio" => Ok(BlockDriver::VirtioMmio),
            "virtio-scsi" => Ok(BlockDriver::VirtioScsi),
            "nvdimm" => Ok(BlockDriver::Nvdimm),
            _ => Err(Error::Config(format!("unknown block driver {:?}", s))),
        }
    }
}

/// Configuration of a [`DeviceManager`](crate::DeviceManager).
///
/// Keys follow the hypervisor section of the runtime configuration file:
///
/// ```toml
/// block_device_driver = "virtio-blk"
/// enable_vhost_user_store = true
/// vhost_user_store_path = "/var/run/kata-containers/vhost-user"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceManagerConfig {
    /// Driver for generic block devices.
    pub block_device_driver: BlockDriver,

    /// Whether vhost-user block devices are detected in the vhost-user store.
    pub enable_vhost_user_store: bool,

    /// Root of the vhost-user store, holding `block/devices` and `block/sockets`.
    pub vhost_user_store_path: PathBuf,

    /// sysfs directory listing the devices of each IOMMU group.
    pub iommu_groups_path: PathBuf,
}

impl Default for DeviceManagerConfig {
    fn default() -> Self {
        Self {
            block_device_driver: BlockDriver::default(),
            enable_vhost_user_store: false,
            vhost_user_store_path: PathBuf::from(DEFAULT_VHOST_USER_STORE_PATH),
            iommu_groups_path: PathBuf::from(DEFAULT_IOMMU_GROUPS_PATH),
        }
    }
}

impl DeviceManagerConfig {
    /// Parse and validate a TOML fragment.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: DeviceManagerConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse toml: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.enable_vhost_user_store && !self.vhost_user_store_path.is_absolute() {
            return Err(Error::Config(format!(
                "vhost-user store path {} must be absolute",
                self.vhost_user_store_path.display()
            )));
        }
        if !self.iommu_groups_path.is_absolute() {
            return Err(Error::Config(format!(
                "iommu groups path {} must be absolute",
                self.iommu_groups_path.display()
            )));
        }
        Ok(())
    }
}
