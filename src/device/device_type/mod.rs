// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

mod block;
mod vfio;
mod vhost_user_blk;
mod vhost_user_net;

pub use block::BlockDevice;
pub use vfio::{iommu_group_devices, VfioDevice};
pub use vhost_user_blk::VhostUserBlkDevice;
pub use vhost_user_net::VhostUserNetDevice;

use std::sync::{Arc, Weak};

use crate::{
    device::{DeviceInfo, DeviceState},
    DeviceReceiver, Error, Result,
};

pub const MAX_DEV_ID_SIZE: usize = 31;

/// State shared by every device kind: identity, attach count and the receiver
/// the device is live in.
#[derive(Debug)]
pub struct GenericDevice {
    id: String,
    device_info: DeviceInfo,
    attach_count: u64,
    state: DeviceState,
    receiver: Option<Weak<dyn DeviceReceiver>>,
}

impl GenericDevice {
    pub fn new(id: &str, dev_info: &DeviceInfo) -> Self {
        Self {
            id: id.to_string(),
            device_info: dev_info.clone(),
            attach_count: 0,
            state: DeviceState::Created,
            receiver: None,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.id
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn get_attach_count(&self) -> u64 {
        self.attach_count
    }

    fn is_receiver(&self, r: &Arc<dyn DeviceReceiver>) -> bool {
        self.receiver.as_ref().map_or(false, |w| {
            std::ptr::eq(w.as_ptr() as *const (), Arc::as_ptr(r) as *const ())
        })
    }

    // bump_attach_count accounts an attach (attach=true) or detach request
    // return values:
    // * skip bool: the count was updated and no real attach/detach is needed.
    // * false: the real attach/detach must be done first; the count is left
    //   untouched until commit_attach/commit_detach.
    // * err error: the request is refused and nothing changed.
    pub fn bump_attach_count(&mut self, attach: bool, r: &Arc<dyn DeviceReceiver>) -> Result<bool> {
        if attach {
            match self.attach_count {
                0 => Ok(false),
                u64::MAX => Err(Error::TooManyAttachments(self.id.clone())),
                _ if !self.is_receiver(r) => Err(Error::AttachedToOtherReceiver(self.id.clone())),
                _ => {
                    self.attach_count += 1;
                    Ok(true)
                }
            }
        } else {
            // detach use case
            match self.attach_count {
                0 => Err(Error::NotAttached(self.id.clone())),
                _ if !self.is_receiver(r) => Err(Error::ReceiverMismatch(self.id.clone())),
                1 => Ok(false),
                _ => {
                    self.attach_count -= 1;
                    Ok(true)
                }
            }
        }
    }

    // commit_attach records a successful real attach
    pub fn commit_attach(&mut self, r: &Arc<dyn DeviceReceiver>) {
        self.attach_count = 1;
        self.state = DeviceState::Attached;
        self.receiver = Some(Arc::downgrade(r));
    }

    // commit_detach records a successful real detach
    pub fn commit_detach(&mut self) {
        self.attach_count = 0;
        self.state = DeviceState::Detached;
        self.receiver = None;
    }

    pub(crate) fn attach_error(&self, source: anyhow::Error) -> Error {
        Error::Attach {
            id: self.id.clone(),
            source,
        }
    }

    pub(crate) fn detach_error(&self, source: anyhow::Error) -> Error {
        Error::Detach {
            id: self.id.clone(),
            source,
        }
    }
}

// release_block_index gives a reserved block index back to the receiver; the
// failure is only logged as the caller is already unwinding or done.
pub(crate) async fn release_block_index(r: &Arc<dyn DeviceReceiver>, id: &str, index: u64) {
    if let Err(e) = r.unset_block_index(index).await {
        warn!(sl!(), "failed to release block index {} of device {}: {:?}", index, id, e);
    }
}
