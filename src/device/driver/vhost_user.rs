// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VhostUserType {
    Blk,
    Net,
}

// VhostUserConfig represents data shared by vhost-user devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VhostUserConfig {
    pub dev_id: String,
    pub socket_path: String,
    //mac_address is only meaningful for vhost user net device
    pub mac_address: Option<String>,
    pub device_type: VhostUserType,
    // Block index of the device if assigned
    pub index: Option<u64>,
}
