// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfioConfig {
    /// Unique identifier of the device
    pub id: String,

    /// Path of the VFIO group on host, e.g. /dev/vfio/12
    pub host_path: String,

    pub iommu_group: String,

    /// Bus::Device.Function ids of the devices in the IOMMU group
    pub bdfs: Vec<String>,
}
