//! Probe / reconciliation state machine (spec §4.1, §4.7): the gate that
//! must succeed before any mutating Controller or Node RPC is accepted.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::error::CoreError;
use crate::lvm::{LvmDriver, LvmError};
use crate::modules::{module_for_filesystem, ModuleInventory};
use crate::mount::MountAdapter;

pub struct Probe {
    config: Arc<Config>,
    driver: Arc<dyn LvmDriver>,
    mounts: Arc<dyn MountAdapter>,
    modules: Arc<dyn ModuleInventory>,
}

/// A stack of compensating actions accumulated while reconciling PVs, so
/// a later failure (e.g. `vgcreate` failing after two `pvcreate`s
/// succeeded) unwinds deterministically instead of leaving half-built
/// LVM state behind. `unwind` awaits every action to completion before
/// returning, so a caller that propagates the resulting error to an RPC
/// client is guaranteed the compensating actions have already run.
struct RollbackStack {
    actions: Vec<futures::future::BoxFuture<'static, ()>>,
}

impl RollbackStack {
    fn new() -> Self {
        Self { actions: Vec::new() }
    }

    fn push(&mut self, action: impl std::future::Future<Output = ()> + Send + 'static) {
        self.actions.push(Box::pin(action));
    }

    async fn unwind(self) {
        futures::future::join_all(self.actions.into_iter().rev()).await;
    }

    fn disarm(mut self) {
        self.actions.clear();
    }
}

impl Probe {
    pub fn new(
        config: Arc<Config>,
        driver: Arc<dyn LvmDriver>,
        mounts: Arc<dyn MountAdapter>,
        modules: Arc<dyn ModuleInventory>,
    ) -> Self {
        Self {
            config,
            driver,
            mounts,
            modules,
        }
    }

    pub async fn run(&self) -> Result<(), CoreError> {
        self.check_modules().await?;
        self.check_devices_exist().await?;

        if self.config.remove_mode {
            return self.teardown().await;
        }

        let existing_vg = match self.driver.vg_lookup(&self.config.volume_group_name).await {
            Ok(vg) => Some(vg),
            Err(LvmError::NotFound(_)) => None,
            Err(LvmError::Other(msg)) => return Err(CoreError::failed_precondition(msg)),
        };

        self.reconcile_pvs(existing_vg.as_ref()).await?;
        self.reconcile_vg(existing_vg).await?;

        Ok(())
    }

    async fn check_modules(&self) -> Result<(), CoreError> {
        for fstype in &self.config.supported_filesystems {
            let module = module_for_filesystem(fstype);
            let live = self
                .modules
                .is_live(module)
                .await
                .map_err(CoreError::failed_precondition)?;
            if !live {
                return Err(CoreError::failed_precondition(format!(
                    "kernel module '{}' required for filesystem '{}' is not loaded",
                    module, fstype
                )));
            }
        }
        Ok(())
    }

    async fn check_devices_exist(&self) -> Result<(), CoreError> {
        for device in &self.config.device_paths {
            let exists = self
                .mounts
                .device_exists(device)
                .await
                .map_err(CoreError::from)?;
            if !exists {
                return Err(CoreError::failed_precondition(format!(
                    "device {:?} does not exist",
                    device
                )));
            }
        }
        Ok(())
    }

    /// Reconciles each configured device path against LVM's view of the
    /// world (spec §4.1 step 3), including lost-PV detection (spec §4.7).
    async fn reconcile_pvs(&self, existing_vg: Option<&crate::lvm::VolumeGroup>) -> Result<(), CoreError> {
        let expected_members: HashSet<PathBuf> = existing_vg
            .map(|vg| vg.physical_volumes.iter().cloned().collect())
            .unwrap_or_default();

        let mut rollback = RollbackStack::new();

        for device in &self.config.device_paths {
            match self.driver.pv_lookup(device).await {
                Ok(pv) => match pv.volume_group {
                    Some(ref vg) if vg == &self.config.volume_group_name => {
                        // already a member of our VG, nothing to do.
                    }
                    Some(other) => {
                        rollback.unwind().await;
                        return Err(CoreError::failed_precondition(format!(
                            "physical volume {:?} already belongs to volume group '{}'",
                            device, other
                        )));
                    }
                    None => {
                        // Known to LVM but unassigned: treat as available,
                        // nothing further to do until vg_create/extend.
                    }
                },
                Err(LvmError::NotFound(_)) => {
                    if expected_members.contains(device) {
                        rollback.unwind().await;
                        return Err(CoreError::failed_precondition(format!(
                            "Cannot lookup physical volume \"{}\": err=lvm: physical volume not found",
                            device.display()
                        )));
                    }
                    if let Err(e) = self.initialize_pv(device, &mut rollback).await {
                        rollback.unwind().await;
                        return Err(e);
                    }
                }
                Err(LvmError::Other(msg)) => {
                    rollback.unwind().await;
                    return Err(CoreError::failed_precondition(msg));
                }
            }
        }

        rollback.disarm();
        Ok(())
    }

    /// spec §4.1 step 3: a device unknown to LVM is either initialized
    /// directly (unformatted) or zeroed first (formatted with a
    /// supported filesystem) before `pvcreate`.
    async fn initialize_pv(&self, device: &Path, rollback: &mut RollbackStack) -> Result<(), CoreError> {
        let fstype = self
            .mounts
            .probe_fs_type(device)
            .await
            .map_err(|e| CoreError::from(e))?;

        match fstype {
            None => {}
            Some(ref fstype) if self.config.supported_filesystems.iter().any(|f| f == fstype) => {
                self.mounts
                    .zero_sector(device)
                    .await
                    .map_err(CoreError::from)?;
            }
            Some(fstype) => {
                return Err(CoreError::failed_precondition(format!(
                    "device {:?} carries an unrecognized filesystem signature '{}', refusing to initialize as a physical volume",
                    device, fstype
                )));
            }
        }

        self.driver.pv_create(device).await.map_err(CoreError::from)?;
        let driver = self.driver.clone();
        let device = device.to_path_buf();
        rollback.push(async move {
            if let Err(e) = driver.pv_remove(&device).await {
                log::error!(
                    "probe rollback: failed to pv_remove {:?} after a later reconciliation step failed: {}",
                    device,
                    e
                );
            }
        });
        Ok(())
    }

    /// spec §4.1 step 4: create or validate the volume group itself.
    async fn reconcile_vg(&self, existing_vg: Option<crate::lvm::VolumeGroup>) -> Result<(), CoreError> {
        for tag in &self.config.tags {
            self.driver
                .validate_tag(tag)
                .map_err(CoreError::failed_precondition)?;
        }

        match existing_vg {
            None => {
                self.driver
                    .vg_create(
                        &self.config.volume_group_name,
                        &self.config.device_paths,
                        &self.config.tags,
                    )
                    .await
                    .map_err(CoreError::from)?;
                Ok(())
            }
            Some(vg) => {
                let configured: HashSet<&PathBuf> = self.config.device_paths.iter().collect();
                let actual: HashSet<&PathBuf> = vg.physical_volumes.iter().collect();

                let extras: Vec<String> = actual
                    .difference(&configured)
                    .map(|p| p.display().to_string())
                    .collect();
                let missing: Vec<String> = configured
                    .difference(&actual)
                    .map(|p| p.display().to_string())
                    .collect();

                if !extras.is_empty() || !missing.is_empty() {
                    return Err(CoreError::failed_precondition(format!(
                        "Volume group contains unexpected volumes {} and is missing volumes {}",
                        format_list(&extras),
                        format_list(&missing)
                    )));
                }

                let mut configured_tags: Vec<String> = self.config.tags.clone();
                let mut existing_tags: Vec<String> = vg.tags.clone();
                configured_tags.sort();
                existing_tags.sort();
                if configured_tags != existing_tags {
                    return Err(CoreError::failed_precondition(format!(
                        "csilvm: Configured tags don't match existing tags: {:?} != {:?}",
                        self.config.tags, vg.tags
                    )));
                }

                Ok(())
            }
        }
    }

    /// spec §4.1 step 5: remove mode's success path.
    async fn teardown(&self) -> Result<(), CoreError> {
        let lv_names = match self.driver.vg_list_lv_names(&self.config.volume_group_name).await {
            Ok(names) => names,
            Err(LvmError::NotFound(_)) => return Ok(()),
            Err(LvmError::Other(msg)) => return Err(CoreError::failed_precondition(msg)),
        };

        for lv in lv_names {
            self.driver
                .lv_remove(&self.config.volume_group_name, &lv)
                .await
                .map_err(CoreError::from)?;
        }

        self.driver
            .vg_remove(&self.config.volume_group_name)
            .await
            .map_err(CoreError::from)?;

        for device in &self.config.device_paths {
            self.driver.pv_remove(device).await.map_err(CoreError::from)?;
        }

        Ok(())
    }
}

fn format_list(items: &[String]) -> String {
    if items.is_empty() {
        "[]".to_string()
    } else {
        format!("[{}]", items.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lvm::testutil::FakeLvmDriver;
    use crate::modules::ModuleInventory;
    use crate::mount::MountAdapter;
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct AllLiveModules;
    #[async_trait]
    impl ModuleInventory for AllLiveModules {
        async fn is_live(&self, _module: &str) -> Result<bool, String> {
            Ok(true)
        }
    }

    struct NoopMounts;
    #[async_trait]
    impl MountAdapter for NoopMounts {
        async fn read_mountinfo(&self) -> Result<Vec<crate::mount::MountRecord>, crate::error::MountError> {
            Ok(vec![])
        }
        async fn bind_mount(&self, _: &Path, _: &Path, _: bool) -> Result<(), crate::error::MountError> {
            Ok(())
        }
        async fn fs_mount(&self, _: &Path, _: &Path, _: &str, _: bool) -> Result<(), crate::error::MountError> {
            Ok(())
        }
        async fn umount(&self, _: &Path) -> Result<(), crate::error::MountError> {
            Ok(())
        }
        async fn probe_fs_type(&self, _: &Path) -> Result<Option<String>, crate::error::MountError> {
            Ok(None)
        }
        async fn mkfs(&self, _: &Path, _: &str) -> Result<(), crate::error::MountError> {
            Ok(())
        }
        async fn zero_sector(&self, _: &Path) -> Result<(), crate::error::MountError> {
            Ok(())
        }
        async fn zero_device(&self, _: &Path, _: u64) -> Result<(), crate::error::MountError> {
            Ok(())
        }
        async fn device_exists(&self, _: &Path) -> Result<bool, crate::error::MountError> {
            Ok(true)
        }
    }

    fn config(devices: Vec<&str>) -> Arc<Config> {
        Arc::new(Config {
            volume_group_name: "test-vg".to_string(),
            device_paths: devices.into_iter().map(PathBuf::from).collect(),
            default_filesystem: "ext4".to_string(),
            supported_filesystems: vec!["ext4".to_string(), "xfs".to_string()],
            tags: vec!["csi-lvm".to_string()],
            default_volume_size: 1024 * 1024 * 1024,
            remove_mode: false,
            request_limit: 10,
            csi_endpoint: PathBuf::from("/tmp/csi.sock"),
            node_id: "node-1".to_string(),
        })
    }

    #[tokio::test]
    async fn creates_vg_on_first_probe_and_is_idempotent() {
        let driver = Arc::new(FakeLvmDriver::with_devices(&["/dev/fake0"]));
        let cfg = config(vec!["/dev/fake0"]);
        let probe = Probe::new(
            cfg,
            driver.clone(),
            Arc::new(NoopMounts),
            Arc::new(AllLiveModules),
        );

        probe.run().await.unwrap();
        assert_eq!(driver.vg_create_calls(), 1);
        assert_eq!(driver.pv_create_calls(), 1);

        probe.run().await.unwrap();
        // idempotent: no additional creation calls on a clean second probe.
        assert_eq!(driver.vg_create_calls(), 1);
        assert_eq!(driver.pv_create_calls(), 1);
    }

    #[tokio::test]
    async fn rejects_pv_owned_by_other_vg() {
        let driver = Arc::new(FakeLvmDriver::with_devices(&["/dev/fake0"]));
        driver.assign_pv_to_vg("/dev/fake0", "other-vg");
        let cfg = config(vec!["/dev/fake0"]);
        let probe = Probe::new(cfg, driver, Arc::new(NoopMounts), Arc::new(AllLiveModules));

        let err = probe.run().await.unwrap_err();
        assert!(matches!(err, CoreError::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn detects_lost_pv_after_adoption() {
        let driver = Arc::new(FakeLvmDriver::with_devices(&["/dev/fake0"]));
        let cfg = config(vec!["/dev/fake0"]);
        let probe = Probe::new(
            cfg.clone(),
            driver.clone(),
            Arc::new(NoopMounts),
            Arc::new(AllLiveModules),
        );
        probe.run().await.unwrap();

        driver.simulate_pv_lost("/dev/fake0");

        let err = probe.run().await.unwrap_err();
        match err {
            CoreError::FailedPrecondition(msg) => {
                assert!(msg.contains("Cannot lookup physical volume"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn detects_unexpected_and_missing_volumes() {
        let driver = Arc::new(FakeLvmDriver::with_devices(&["/dev/fake0", "/dev/fake1"]));
        let cfg_initial = config(vec!["/dev/fake0", "/dev/fake1"]);
        let probe = Probe::new(
            cfg_initial,
            driver.clone(),
            Arc::new(NoopMounts),
            Arc::new(AllLiveModules),
        );
        probe.run().await.unwrap();

        driver.add_device("/dev/fake2");
        let cfg_mismatch = config(vec!["/dev/fake0", "/dev/fake2"]);
        let probe2 = Probe::new(cfg_mismatch, driver, Arc::new(NoopMounts), Arc::new(AllLiveModules));
        let err = probe2.run().await.unwrap_err();
        match err {
            CoreError::FailedPrecondition(msg) => {
                assert!(msg.contains("unexpected volumes"));
                assert!(msg.contains("missing volumes"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn remove_mode_tears_down_vg_and_pvs() {
        let driver = Arc::new(FakeLvmDriver::with_devices(&["/dev/fake0"]));
        let cfg = config(vec!["/dev/fake0"]);
        let probe = Probe::new(
            cfg.clone(),
            driver.clone(),
            Arc::new(NoopMounts),
            Arc::new(AllLiveModules),
        );
        probe.run().await.unwrap();
        driver
            .lv_create(&cfg.volume_group_name, "v1", 64 * 1024 * 1024, &[])
            .await
            .unwrap();

        let mut remove_cfg = (*config(vec!["/dev/fake0"])).clone();
        remove_cfg.remove_mode = true;
        let remove_probe = Probe::new(
            Arc::new(remove_cfg),
            driver.clone(),
            Arc::new(NoopMounts),
            Arc::new(AllLiveModules),
        );
        remove_probe.run().await.unwrap();

        assert!(driver.vg_lookup("test-vg").await.is_err());
    }
}
