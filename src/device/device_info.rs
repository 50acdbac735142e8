// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

use std::{collections::HashMap, convert::TryFrom, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// DriverOptions key overriding the block driver of a single device.
pub const BLOCK_DRIVER_OPT: &str = "block-driver";
/// DriverOptions key for the filesystem type of a block device.
pub const FS_TYPE_OPT: &str = "fstype";
/// DriverOptions key for the MAC address of a vhost-user net device.
pub const MAC_ADDRESS_OPT: &str = "mac";

/// Type of device: c, b, u or p
/// c , u - character(unbuffered)
/// p - FIFO
/// b - block(buffered) special file
/// More info in mknod(1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceClass {
    Block,
    Char,
    Generic,
}

impl Default for DeviceClass {
    fn default() -> Self {
        DeviceClass::Generic
    }
}

impl FromStr for DeviceClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "b" | "block" => Ok(DeviceClass::Block),
            "c" | "u" | "char" => Ok(DeviceClass::Char),
            "p" | "" | "generic" => Ok(DeviceClass::Generic),
            _ => Err(Error::InvalidDeviceInfo(format!(
                "unknown device type {:?}",
                s
            ))),
        }
    }
}

impl TryFrom<String> for DeviceClass {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<DeviceClass> for String {
    fn from(class: DeviceClass) -> Self {
        match class {
            DeviceClass::Block => "b",
            DeviceClass::Char => "c",
            DeviceClass::Generic => "p",
        }
        .to_string()
    }
}

/// DeviceInfo describes a host device requested for a sandbox.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    /// Hostpath is device path on host
    pub host_path: String,

    /// ContainerPath is device path inside container
    pub container_path: String,

    pub dev_type: DeviceClass,

    /// Major, minor numbers for device. Probed from the host path when absent.
    pub major: Option<u64>,
    pub minor: Option<u64>,

    pub read_only: bool,

    /// DriverOptions is specific options for each device driver
    /// for example, for BlockDevice, we can set DriverOptions["block-driver"]="virtio-blk"
    pub driver_options: HashMap<String, String>,
}

impl DeviceInfo {
    pub fn validate(&self) -> Result<()> {
        if self.host_path.is_empty() {
            return Err(Error::InvalidDeviceInfo(
                "empty host path provided for device".to_string(),
            ));
        }
        if self.major.is_some() != self.minor.is_some() {
            return Err(Error::InvalidDeviceInfo(format!(
                "device {} must set both major and minor or neither",
                self.host_path
            )));
        }
        Ok(())
    }

    pub fn major_minor(&self) -> Option<(u64, u64)> {
        self.major.zip(self.minor)
    }

    pub fn driver_option(&self, key: &str) -> Option<&str> {
        self.driver_options.get(key).map(|v| v.as_str())
    }
}
