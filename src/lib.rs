// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

//! Device manager of the sandbox runtime.
//!
//! Tracks the host devices handed to a sandbox, classifies each host path into
//! one of the supported device kinds and drives its hot-plug lifecycle through
//! a [`DeviceReceiver`] implemented by the sandbox layer.

#[macro_use]
extern crate slog;

// Convenience macro to obtain the scoped logger
#[macro_export]
macro_rules! sl {
    () => {
        slog_scope::logger().new(o!("subsystem" => "device"))
    };
}

pub mod config;
pub mod device;
mod error;
pub mod probe;
pub mod utils;

pub use config::{BlockDriver, DeviceManagerConfig};
pub use device::device_manager::DeviceManager;
pub use device::driver::{DeviceConfig, DeviceReceiver};
pub use device::{DeviceClass, DeviceHandle, DeviceInfo, DeviceKind, DeviceState};
pub use error::{Error, Result};
pub use probe::{HostNodeProber, NodeProber, NodeStat, NodeType};
pub use tokio_util::sync::CancellationToken;
