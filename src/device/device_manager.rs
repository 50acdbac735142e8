// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use path_clean::PathClean;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{BlockDriver, DeviceManagerConfig},
    device::{
        device_type::{BlockDevice, VfioDevice, VhostUserBlkDevice, VhostUserNetDevice},
        registry::DeviceRegistry,
        vhost_user_store::{lookup_vhost_user_blk, VhostUserBlkPaths, VHOST_USER_BLK_MAJOR},
        Device, DeviceClass, DeviceHandle, DeviceInfo, BLOCK_DRIVER_OPT,
    },
    probe::{HostNodeProber, NodeProber, NodeType},
    DeviceReceiver, Error, Result,
};

const VFIO_DEV_DIR: &str = "/dev/vfio";
// the VFIO container device, not a group
const VFIO_CONTAINER: &str = "vfio";

/// Device kind picked for a descriptor, with everything needed to build it.
#[derive(Debug, PartialEq)]
enum ResolvedDevice {
    Vfio { info: DeviceInfo, group: String },
    VhostUserBlk { info: DeviceInfo, paths: VhostUserBlkPaths },
    Block { info: DeviceInfo, driver: BlockDriver },
    VhostUserNet { info: DeviceInfo },
}

impl ResolvedDevice {
    fn into_device(self, id: &str, config: &DeviceManagerConfig) -> Box<dyn Device> {
        match self {
            ResolvedDevice::Vfio { info, group } => Box::new(VfioDevice::new(
                id,
                &info,
                &group,
                &config.iommu_groups_path,
            )),
            ResolvedDevice::VhostUserBlk { info, paths } => {
                Box::new(VhostUserBlkDevice::new(id, &info, paths))
            }
            ResolvedDevice::Block { info, driver } => Box::new(BlockDevice::new(id, &info, driver)),
            ResolvedDevice::VhostUserNet { info } => Box::new(VhostUserNetDevice::new(id, &info)),
        }
    }
}

fn vfio_group(host_path: &Path) -> Option<String> {
    if host_path.parent() != Some(Path::new(VFIO_DEV_DIR)) {
        return None;
    }
    host_path
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| *name != VFIO_CONTAINER)
        .map(String::from)
}

// resolve_device picks the device kind of a validated descriptor. It probes the
// host and reads the vhost-user store, so it must not run under any lock.
fn resolve_device(
    config: &DeviceManagerConfig,
    prober: &dyn NodeProber,
    mut info: DeviceInfo,
) -> Result<ResolvedDevice> {
    let host_path = PathBuf::from(&info.host_path).clean();
    if let Some(group) = vfio_group(&host_path) {
        return Ok(ResolvedDevice::Vfio { info, group });
    }

    // A block or char descriptor carrying its numbers is trusted as is,
    // anything else is probed.
    let trusted = info.major_minor().is_some() && info.dev_type != DeviceClass::Generic;
    let probed = if trusted {
        None
    } else {
        let stat = prober.probe(&host_path).map_err(|source| Error::Probe {
            path: info.host_path.clone(),
            source,
        })?;
        Some(stat)
    };

    // probed numbers only fill in what the caller left out
    if let Some(stat) = probed {
        if info.major_minor().is_none() && stat.node_type.is_block_or_char() {
            info.major = Some(stat.major);
            info.minor = Some(stat.minor);
        }
    }
    let is_special = probed.map_or(true, |stat| stat.node_type.is_block_or_char());

    if let Some((major, minor)) = info.major_minor() {
        if major == VHOST_USER_BLK_MAJOR && config.enable_vhost_user_store {
            match lookup_vhost_user_blk(
                prober,
                &config.vhost_user_store_path,
                &host_path,
                major,
                minor,
            ) {
                Some(paths) => return Ok(ResolvedDevice::VhostUserBlk { info, paths }),
                None => warn!(sl!(), "vhost-user-blk device node or socket missing in store";
                    "device" => &info.host_path,
                    "store" => config.vhost_user_store_path.display().to_string()),
            }
        }
    }

    if is_special {
        let driver = match info.driver_option(BLOCK_DRIVER_OPT) {
            Some(driver) => driver.parse()?,
            None => config.block_device_driver,
        };
        return Ok(ResolvedDevice::Block { info, driver });
    }

    // vhost-user devices of any kind need the store enabled
    if probed.map(|stat| stat.node_type) == Some(NodeType::Socket)
        && config.enable_vhost_user_store
    {
        return Ok(ResolvedDevice::VhostUserNet { info });
    }

    info!(sl!(), "device has not been passed to the container"; "device" => &info.host_path);
    Err(Error::UnsupportedDevice(info.host_path))
}

/// Registry of the devices of one sandbox.
pub struct DeviceManager {
    config: Arc<DeviceManagerConfig>,
    prober: Arc<dyn NodeProber>,
    registry: DeviceRegistry,
}

impl DeviceManager {
    pub fn new(config: DeviceManagerConfig) -> Result<Self> {
        Self::new_with_prober(config, Arc::new(HostNodeProber::default()))
    }

    /// Creates a manager probing host paths through `prober`.
    pub fn new_with_prober(
        config: DeviceManagerConfig,
        prober: Arc<dyn NodeProber>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(DeviceManager {
            config: Arc::new(config),
            prober,
            registry: DeviceRegistry::new(),
        })
    }

    pub fn config(&self) -> &DeviceManagerConfig {
        &self.config
    }

    /// Classifies and registers the device described by `dev_info`.
    pub async fn new_device(&self, dev_info: &DeviceInfo) -> Result<DeviceHandle> {
        dev_info.validate()?;

        let config = self.config.clone();
        let prober = self.prober.clone();
        let info = dev_info.clone();
        let resolved =
            tokio::task::spawn_blocking(move || resolve_device(&config, prober.as_ref(), info))
                .await
                .map_err(|e| Error::Resolve(e.to_string()))??;

        // device ID must be generated by manager instead of device itself
        let id = self.registry.allocate_id().await?;
        let handle = DeviceHandle::new(resolved.into_device(&id, &self.config));
        if let Err(e) = self.registry.insert(id.clone(), handle.clone()).await {
            self.registry.release(&id).await;
            return Err(e);
        }

        info!(sl!(), "new device";
            "id" => &id,
            "kind" => handle.kind().to_string(),
            "host-path" => &handle.device_info().host_path);
        Ok(handle)
    }

    pub async fn get_device(&self, id: &str) -> Result<DeviceHandle> {
        self.registry.get(id).await
    }

    pub async fn get_all_devices(&self) -> Vec<DeviceHandle> {
        self.registry.list().await
    }

    /// Finds a registered device by major/minor, or by host path when the
    /// descriptor carries no numbers.
    pub async fn find_device(&self, dev_info: &DeviceInfo) -> Option<DeviceHandle> {
        let host_path = PathBuf::from(&dev_info.host_path).clean();
        self.registry.list().await.into_iter().find(|dev| {
            let info = dev.device_info();
            match dev_info.major_minor() {
                Some(numbers) => info.major_minor() == Some(numbers),
                None => PathBuf::from(&info.host_path).clean() == host_path,
            }
        })
    }

    pub async fn is_device_attached(&self, id: &str) -> bool {
        match self.registry.get(id).await {
            Ok(dev) => dev.is_attached().await,
            Err(_) => false,
        }
    }

    pub async fn attach_device(
        &self,
        id: &str,
        token: &CancellationToken,
        receiver: &Arc<dyn DeviceReceiver>,
    ) -> Result<()> {
        let dev = self.registry.get(id).await?;
        dev.attach(token, receiver).await
    }

    pub async fn detach_device(
        &self,
        id: &str,
        token: &CancellationToken,
        receiver: &Arc<dyn DeviceReceiver>,
    ) -> Result<()> {
        let dev = self.registry.get(id).await?;
        dev.detach(token, receiver).await
    }

    /// Drops a device holding no attachment from the registry.
    pub async fn remove_device(&self, id: &str) -> Result<()> {
        let dev = self.registry.get(id).await?;
        dev.retire(|| async {
            self.registry.remove(id).await?;
            Ok(())
        })
        .await?;
        info!(sl!(), "removed device"; "id" => id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::device_type::tests::MockReceiver;
    use crate::device::vhost_user_store::{vhost_user_blk_devices_dir, vhost_user_blk_sockets_dir};
    use crate::device::{DeviceKind, DeviceState};
    use crate::probe::NodeStat;
    use std::{collections::HashMap, fs, io, sync::atomic::Ordering};

    /// Prober answering from a fixed table.
    #[derive(Default)]
    struct TableProber {
        nodes: HashMap<PathBuf, NodeStat>,
    }

    impl TableProber {
        fn with(mut self, path: &Path, node_type: NodeType, major: u64, minor: u64) -> Self {
            self.nodes.insert(
                path.to_path_buf(),
                NodeStat {
                    node_type,
                    major,
                    minor,
                },
            );
            self
        }
    }

    impl NodeProber for TableProber {
        fn probe(&self, path: &Path) -> io::Result<NodeStat> {
            self.nodes
                .get(path)
                .copied()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }
    }

    fn vhost_user_store(socket: bool) -> (tempfile::TempDir, PathBuf) {
        let store = tempfile::tempdir().unwrap();
        let devices = vhost_user_blk_devices_dir(store.path());
        let sockets = vhost_user_blk_sockets_dir(store.path());
        fs::create_dir_all(&devices).unwrap();
        fs::create_dir_all(&sockets).unwrap();
        let node = devices.join("vhostblk0");
        fs::write(&node, b"").unwrap();
        if socket {
            fs::write(sockets.join("vhostblk0"), b"").unwrap();
        }
        (store, node)
    }

    fn vhost_config(store: &Path, enabled: bool) -> DeviceManagerConfig {
        DeviceManagerConfig {
            block_device_driver: BlockDriver::VirtioBlock,
            enable_vhost_user_store: enabled,
            vhost_user_store_path: store.to_path_buf(),
            ..Default::default()
        }
    }

    fn resolve(
        config: &DeviceManagerConfig,
        prober: &dyn NodeProber,
        info: &DeviceInfo,
    ) -> Result<ResolvedDevice> {
        resolve_device(config, prober, info.clone())
    }

    #[test]
    fn test_resolve_vhost_user_blk_conditions() {
        let (store, node) = vhost_user_store(true);
        let prober = TableProber::default().with(&node, NodeType::Block, VHOST_USER_BLK_MAJOR, 0);
        let info = DeviceInfo {
            host_path: node.display().to_string(),
            container_path: "/dev/vda".to_string(),
            ..Default::default()
        };

        // all three conditions hold
        match resolve(&vhost_config(store.path(), true), &prober, &info).unwrap() {
            ResolvedDevice::VhostUserBlk { info, paths } => {
                assert_eq!(info.major_minor(), Some((VHOST_USER_BLK_MAJOR, 0)));
                assert_eq!(paths.socket, store.path().join("block/sockets/vhostblk0"));
            }
            other => panic!("unexpected {:?}", other),
        }

        // vhost-user store disabled
        assert!(matches!(
            resolve(&vhost_config(store.path(), false), &prober, &info).unwrap(),
            ResolvedDevice::Block { driver: BlockDriver::VirtioBlock, .. }
        ));

        // another major
        let prober8 = TableProber::default().with(&node, NodeType::Block, 8, 0);
        assert!(matches!(
            resolve(&vhost_config(store.path(), true), &prober8, &info).unwrap(),
            ResolvedDevice::Block { .. }
        ));

        // socket missing
        fs::remove_file(store.path().join("block/sockets/vhostblk0")).unwrap();
        assert!(matches!(
            resolve(&vhost_config(store.path(), true), &prober, &info).unwrap(),
            ResolvedDevice::Block { .. }
        ));
    }

    #[test]
    fn test_resolve_descriptor_numbers_win() {
        let (store, node) = vhost_user_store(true);
        // the node probes as an ordinary disk but the caller says vhost-user
        let prober = TableProber::default().with(&node, NodeType::Block, 8, 0);
        let info = DeviceInfo {
            host_path: node.display().to_string(),
            dev_type: DeviceClass::Generic,
            major: Some(VHOST_USER_BLK_MAJOR),
            minor: Some(0),
            ..Default::default()
        };
        match resolve(&vhost_config(store.path(), true), &prober, &info).unwrap() {
            ResolvedDevice::VhostUserBlk { info, .. } => {
                assert_eq!(info.major_minor(), Some((VHOST_USER_BLK_MAJOR, 0)))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_resolve_other_kinds() {
        let config = DeviceManagerConfig::default();
        let prober = TableProber::default()
            .with(Path::new("/dev/sdb"), NodeType::Block, 8, 16)
            .with(Path::new("/dev/ttyS1"), NodeType::Char, 4, 65)
            .with(Path::new("/run/net.sock"), NodeType::Socket, 0, 0)
            .with(Path::new("/tmp/file"), NodeType::Other, 0, 0);
        let info = |path: &str| DeviceInfo {
            host_path: path.to_string(),
            ..Default::default()
        };

        match resolve(&config, &prober, &info("/dev/sdb")).unwrap() {
            ResolvedDevice::Block { info, driver } => {
                assert_eq!(driver, BlockDriver::VirtioScsi);
                assert_eq!(info.major_minor(), Some((8, 16)));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            resolve(&config, &prober, &info("/dev/ttyS1")).unwrap(),
            ResolvedDevice::Block { .. }
        ));
        // sockets need the vhost-user store
        assert!(matches!(
            resolve(&config, &prober, &info("/run/net.sock")),
            Err(Error::UnsupportedDevice(_))
        ));
        let store = tempfile::tempdir().unwrap();
        assert!(matches!(
            resolve(&vhost_config(store.path(), true), &prober, &info("/run/net.sock")).unwrap(),
            ResolvedDevice::VhostUserNet { .. }
        ));
        assert!(matches!(
            resolve(&config, &prober, &info("/tmp/file")),
            Err(Error::UnsupportedDevice(_))
        ));
        assert!(matches!(
            resolve(&config, &prober, &info("/dev/missing")),
            Err(Error::Probe { .. })
        ));
        assert!(matches!(
            resolve(&config, &prober, &info("/dev/vfio/12")).unwrap(),
            ResolvedDevice::Vfio { group, .. } if group == "12"
        ));
        // the container device is not a group
        assert!(resolve(&config, &prober, &info("/dev/vfio/vfio")).is_err());

        // trusted descriptor, no probing involved
        let trusted = DeviceInfo {
            host_path: "/dev/not-probed".to_string(),
            dev_type: DeviceClass::Block,
            major: Some(259),
            minor: Some(1),
            driver_options: vec![(BLOCK_DRIVER_OPT.to_string(), "virtio-mmio".to_string())]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        assert!(matches!(
            resolve(&config, &prober, &trusted).unwrap(),
            ResolvedDevice::Block { driver: BlockDriver::VirtioMmio, .. }
        ));
    }

    fn manager_with(prober: TableProber) -> DeviceManager {
        DeviceManager::new_with_prober(
            DeviceManagerConfig {
                block_device_driver: BlockDriver::VirtioBlock,
                ..Default::default()
            },
            Arc::new(prober),
        )
        .unwrap()
    }

    fn vhost_manager_with(store: &Path, prober: TableProber) -> DeviceManager {
        DeviceManager::new_with_prober(vhost_config(store, true), Arc::new(prober)).unwrap()
    }

    #[actix_rt::test]
    async fn test_new_device_errors() {
        let dm = manager_with(TableProber::default());
        assert_eq!(dm.config().block_device_driver, BlockDriver::VirtioBlock);
        assert!(matches!(
            dm.new_device(&DeviceInfo::default()).await,
            Err(Error::InvalidDeviceInfo(_))
        ));
        let missing = DeviceInfo {
            host_path: "/dev/missing".to_string(),
            ..Default::default()
        };
        assert!(matches!(dm.new_device(&missing).await, Err(Error::Probe { .. })));
        // nothing was registered
        assert!(dm.get_all_devices().await.is_empty());

        let bad_config = DeviceManagerConfig {
            enable_vhost_user_store: true,
            vhost_user_store_path: PathBuf::from("relative"),
            ..Default::default()
        };
        assert!(DeviceManager::new(bad_config).is_err());
    }

    #[actix_rt::test]
    async fn test_attach_detach_by_id() {
        let dm = manager_with(
            TableProber::default()
                .with(Path::new("/dev/sdb"), NodeType::Block, 8, 16)
                .with(Path::new("/dev/sdc"), NodeType::Block, 8, 32),
        );
        let (mock, r) = MockReceiver::new_arc();
        let (_, other) = MockReceiver::new_arc();
        let token = CancellationToken::new();

        let dev = dm
            .new_device(&DeviceInfo {
                host_path: "/dev/sdb".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let id = dev.id().to_string();
        assert_eq!(dev.kind(), DeviceKind::Block);
        assert!(!dm.is_device_attached(&id).await);

        for _ in 0..3 {
            dm.attach_device(&id, &token, &r).await.unwrap();
        }
        assert!(dm.is_device_attached(&id).await);
        assert_eq!(dev.reference().await, 3);
        assert_eq!(mock.attach_calls.load(Ordering::SeqCst), 1);

        // live in one sandbox only
        assert!(matches!(
            dm.attach_device(&id, &token, &other).await,
            Err(Error::AttachedToOtherReceiver(_))
        ));
        assert!(matches!(
            dm.detach_device(&id, &token, &other).await,
            Err(Error::ReceiverMismatch(_))
        ));
        assert_eq!(dev.reference().await, 3);

        assert!(matches!(
            dm.remove_device(&id).await,
            Err(Error::RemoveAttachedDevice(_))
        ));
        assert!(dm.get_device(&id).await.is_ok());

        for _ in 0..3 {
            dm.detach_device(&id, &token, &r).await.unwrap();
        }
        assert_eq!(mock.detach_calls.load(Ordering::SeqCst), 1);
        assert_eq!(dev.state().await, DeviceState::Detached);

        // detached device can move to another sandbox
        dm.attach_device(&id, &token, &other).await.unwrap();
        dm.detach_device(&id, &token, &other).await.unwrap();

        assert!(matches!(
            dm.attach_device("unknown", &token, &r).await,
            Err(Error::DeviceNotFound(_))
        ));
    }

    #[actix_rt::test]
    async fn test_find_and_remove() {
        let store = tempfile::tempdir().unwrap();
        let dm = vhost_manager_with(
            store.path(),
            TableProber::default()
                .with(Path::new("/dev/sdb"), NodeType::Block, 8, 16)
                .with(Path::new("/run/net.sock"), NodeType::Socket, 0, 0),
        );
        let (_, r) = MockReceiver::new_arc();
        let token = CancellationToken::new();

        let blk = dm
            .new_device(&DeviceInfo {
                host_path: "/dev/sdb".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let net = dm
            .new_device(&DeviceInfo {
                host_path: "/run/net.sock".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(net.kind(), DeviceKind::VhostUserNet);
        assert_eq!(dm.get_all_devices().await.len(), 2);

        let by_numbers = DeviceInfo {
            host_path: "/dev/other-name".to_string(),
            major: Some(8),
            minor: Some(16),
            ..Default::default()
        };
        assert_eq!(dm.find_device(&by_numbers).await.unwrap().id(), blk.id());
        let by_path = DeviceInfo {
            host_path: "/run//net.sock".to_string(),
            ..Default::default()
        };
        assert_eq!(dm.find_device(&by_path).await.unwrap().id(), net.id());

        // a created device without attachments can be removed
        dm.remove_device(net.id()).await.unwrap();
        assert!(dm.find_device(&by_path).await.is_none());

        blk.attach(&token, &r).await.unwrap();
        blk.detach(&token, &r).await.unwrap();
        dm.remove_device(blk.id()).await.unwrap();
        assert!(matches!(
            dm.get_device(blk.id()).await,
            Err(Error::DeviceNotFound(_))
        ));
        assert!(matches!(
            dm.remove_device(blk.id()).await,
            Err(Error::DeviceNotFound(_))
        ));
        // the stale handle is retired
        assert!(matches!(
            blk.attach(&token, &r).await,
            Err(Error::DeviceNotFound(_))
        ));
        assert!(dm.get_all_devices().await.is_empty());
    }

    #[actix_rt::test]
    async fn test_cancelled_before_attach() {
        let dm = manager_with(
            TableProber::default().with(Path::new("/dev/sdb"), NodeType::Block, 8, 16),
        );
        let (mock, r) = MockReceiver::new_arc();
        let dev = dm
            .new_device(&DeviceInfo {
                host_path: "/dev/sdb".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(dev.attach(&token, &r).await, Err(Error::Cancelled)));
        assert_eq!(dev.state().await, DeviceState::Created);
        assert_eq!(mock.attach_calls.load(Ordering::SeqCst), 0);
        assert!(mock.indexes.lock().unwrap().is_empty());

        let live = CancellationToken::new();
        dev.attach(&live, &r).await.unwrap();
        assert!(matches!(dev.detach(&token, &r).await, Err(Error::Cancelled)));
        assert!(dev.is_attached().await);
    }
}
