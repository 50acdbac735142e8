// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use crate::{device::DeviceHandle, utils::generate_random_hex, Error, Result};

const DEVICE_ID_BYTES: usize = 8;
const MAX_ID_ATTEMPTS: usize = 5;

#[derive(Default)]
struct RegistryInner {
    devices: HashMap<String, DeviceHandle>,
    // ids handed out by allocate_id and not yet inserted
    reserved: HashSet<String>,
}

impl RegistryInner {
    fn in_use(&self, id: &str) -> bool {
        self.devices.contains_key(id) || self.reserved.contains(id)
    }
}

/// Map of registered devices.
///
/// The lock is only held for the map operation itself, never across I/O or
/// calls into a receiver.
#[derive(Default)]
pub(crate) struct DeviceRegistry {
    inner: RwLock<RegistryInner>,
}

impl DeviceRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reserves a fresh id until it is inserted or released.
    pub(crate) async fn allocate_id(&self) -> Result<String> {
        let mut inner = self.inner.write().await;
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = generate_random_hex(DEVICE_ID_BYTES);
            if !inner.in_use(&id) {
                inner.reserved.insert(id.clone());
                return Ok(id);
            }
        }
        Err(Error::IdExhausted)
    }

    pub(crate) async fn release(&self, id: &str) {
        self.inner.write().await.reserved.remove(id);
    }

    pub(crate) async fn insert(&self, id: String, device: DeviceHandle) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.devices.contains_key(&id) {
            return Err(Error::InvalidDeviceInfo(format!(
                "device ID {} is already registered",
                id
            )));
        }
        inner.reserved.remove(&id);
        inner.devices.insert(id, device);
        Ok(())
    }

    pub(crate) async fn get(&self, id: &str) -> Result<DeviceHandle> {
        self.inner
            .read()
            .await
            .devices
            .get(id)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound(id.to_string()))
    }

    pub(crate) async fn remove(&self, id: &str) -> Result<DeviceHandle> {
        self.inner
            .write()
            .await
            .devices
            .remove(id)
            .ok_or_else(|| Error::DeviceNotFound(id.to_string()))
    }

    pub(crate) async fn list(&self) -> Vec<DeviceHandle> {
        self.inner.read().await.devices.values().cloned().collect()
    }
}
