// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

use crate::config::BlockDriver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockConfig {
    /// Unique identifier of the drive.
    pub id: String,

    /// Path of the drive.
    pub path_on_host: String,

    /// If set to true, the drive is opened in read-only mode. Otherwise, the
    /// drive is opened as read-write.
    pub is_readonly: bool,

    /// Image format of the drive, "raw" unless the fstype option says otherwise.
    pub format: String,

    /// device index
    pub index: u64,

    /// driver type for block device
    pub driver_option: BlockDriver,

    /// device path in guest, unset for virtio-scsi and nvdimm
    pub virt_path: Option<String>,

    /// SCSI address of the drive, only for virtio-scsi
    pub scsi_addr: Option<String>,

    /// device major number
    pub major: u64,

    /// device minor number
    pub minor: u64,
}

impl BlockConfig {
    /// Whether the drive is exposed as a persistent memory device.
    pub fn is_pmem(&self) -> bool {
        self.driver_option == BlockDriver::Nvdimm
    }
}
