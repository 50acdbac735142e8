// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

pub mod device_manager;
pub mod device_type;
pub mod driver;
mod registry;
pub mod vhost_user_store;

mod device_info;
pub use device_info::{
    DeviceClass, DeviceInfo, BLOCK_DRIVER_OPT, FS_TYPE_OPT, MAC_ADDRESS_OPT,
};

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::{
    device::{device_type::GenericDevice, driver::DeviceConfig},
    DeviceReceiver, Error, Result,
};

/// Kind of device selected for a host path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Block,
    VhostUserBlk,
    VhostUserNet,
    Vfio,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceKind::Block => "block",
            DeviceKind::VhostUserBlk => "vhost-user-blk",
            DeviceKind::VhostUserNet => "vhost-user-net",
            DeviceKind::Vfio => "vfio",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a device.
///
/// Created -> Attached -> Detached, and back to Attached on a new attach.
/// A failed attach or detach leaves the state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Created,
    Attached,
    Detached,
}

#[async_trait]
pub trait Device: Send + Sync {
    // attach is to plug device into VM
    async fn attach(&mut self, token: &CancellationToken, r: &Arc<dyn DeviceReceiver>)
        -> Result<()>;
    // detach is to unplug device from VM
    async fn detach(&mut self, token: &CancellationToken, r: &Arc<dyn DeviceReceiver>)
        -> Result<()>;
    // hotplug_config returns the config the device is plugged with, if attached
    fn hotplug_config(&self) -> Option<DeviceConfig>;

    fn kind(&self) -> DeviceKind;
    fn base(&self) -> &GenericDevice;

    fn device_id(&self) -> &str {
        self.base().device_id()
    }

    fn device_info(&self) -> &DeviceInfo {
        self.base().device_info()
    }

    fn state(&self) -> DeviceState {
        self.base().state()
    }

    // reference returns the number of attach calls not yet matched by detach
    fn reference(&self) -> u64 {
        self.base().get_attach_count()
    }
}

pub type ArcMutexDevice = Arc<Mutex<Box<dyn Device>>>;

/// Shared handle to a registered device.
///
/// Attach and detach of one device are serialized by the device lock, which
/// stays held across the call into the receiver.
#[derive(Clone)]
pub struct DeviceHandle {
    id: String,
    kind: DeviceKind,
    info: Arc<DeviceInfo>,
    device: ArcMutexDevice,
    removed: Arc<AtomicBool>,
}

impl DeviceHandle {
    pub(crate) fn new(device: Box<dyn Device>) -> Self {
        Self {
            id: device.device_id().to_string(),
            kind: device.kind(),
            info: Arc::new(device.device_info().clone()),
            device: Arc::new(Mutex::new(device)),
            removed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// The resolved descriptor the device was created from.
    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    // lock_device waits for the device lock unless the token fires first
    async fn lock_device(
        &self,
        token: &CancellationToken,
    ) -> Result<MutexGuard<'_, Box<dyn Device>>> {
        let guard = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Cancelled),
            guard = self.device.lock() => guard,
        };
        if self.removed.load(Ordering::Acquire) {
            return Err(Error::DeviceNotFound(self.id.clone()));
        }
        Ok(guard)
    }

    pub async fn attach(
        &self,
        token: &CancellationToken,
        receiver: &Arc<dyn DeviceReceiver>,
    ) -> Result<()> {
        let mut device = self.lock_device(token).await?;
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        device.attach(token, receiver).await
    }

    pub async fn detach(
        &self,
        token: &CancellationToken,
        receiver: &Arc<dyn DeviceReceiver>,
    ) -> Result<()> {
        let mut device = self.lock_device(token).await?;
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        device.detach(token, receiver).await
    }

    pub async fn state(&self) -> DeviceState {
        self.device.lock().await.state()
    }

    pub async fn reference(&self) -> u64 {
        self.device.lock().await.reference()
    }

    pub async fn is_attached(&self) -> bool {
        self.state().await == DeviceState::Attached
    }

    pub async fn hotplug_config(&self) -> Option<DeviceConfig> {
        self.device.lock().await.hotplug_config()
    }

    /// Runs `remove` under the device lock if the device holds no attachment,
    /// and retires the handle when it succeeds.
    pub(crate) async fn retire<F, Fut>(&self, remove: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let device = self.device.lock().await;
        if self.removed.load(Ordering::Acquire) {
            return Err(Error::DeviceNotFound(self.id.clone()));
        }
        if device.reference() > 0 {
            return Err(Error::RemoveAttachedDevice(self.id.clone()));
        }
        remove().await?;
        self.removed.store(true, Ordering::Release);
        Ok(())
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("host_path", &self.info.host_path)
            .finish()
    }
}
