// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

use std::io;

/// Errors related to device manager operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The metadata of a host path could not be read.
    #[error("failed to probe device node {path}: {source}")]
    Probe {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The device descriptor is structurally invalid.
    #[error("invalid device info: {0}")]
    InvalidDeviceInfo(String),

    /// No device kind matches the host path.
    #[error("unsupported device {0}: not a block, char or vhost-user device")]
    UnsupportedDevice(String),

    /// Could not generate an identifier not already in use.
    #[error("device IDs are exhausted")]
    IdExhausted,

    /// The blocking worker resolving the device kind did not complete.
    #[error("failed to resolve device kind: {0}")]
    Resolve(String),

    /// The device is live in another sandbox.
    #[error("device {0} is already attached to a different receiver")]
    AttachedToOtherReceiver(String),

    /// The attach count would overflow.
    #[error("device {0} was attached too many times")]
    TooManyAttachments(String),

    /// The receiver failed to hot-plug the device.
    #[error("failed to attach device {id}")]
    Attach {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    /// Detaching a device that wasn't attached.
    #[error("device {0} isn't attached")]
    NotAttached(String),

    /// Detach presented with a receiver the device is not attached to.
    #[error("device {0} is not attached to this receiver")]
    ReceiverMismatch(String),

    /// The receiver failed to hot-unplug the device.
    #[error("failed to detach device {id}")]
    Detach {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    /// The device id is unknown to the registry.
    #[error("device with ID {0} hasn't been created")]
    DeviceNotFound(String),

    /// Removing a device that still has attachments.
    #[error("can't remove attached device {0}")]
    RemoveAttachedDevice(String),

    /// The caller cancelled the operation before it reached the receiver.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid device manager configuration.
    #[error("invalid device manager configuration: {0}")]
    Config(String),
}

/// Specialized version of `std::result::Result` for device manager operations.
pub type Result<T> = ::std::result::Result<T, Error>;
