//! Volume lifecycle engine (spec §4.2–§4.4): create/delete, publish/
//! unpublish, list, capacity. This is the business logic the three
//! Controller/Node RPC handlers delegate to once the arbiter has
//! admitted and serialized a request; nothing here knows about proto
//! message types or the arbiter itself.

use std::path::Path;
use std::sync::Arc;

use crate::capacity::{free_bytes, round_up_to_extent};
use crate::config::Config;
use crate::error::CoreError;
use crate::lvm::{LogicalVolume, LvmDriver, LvmError};
use crate::metrics::{Event, MetricsSink};
use crate::mount::{mountinfo, MountAdapter};
use crate::validator::{AccessMode, AccessType, Capability};

#[derive(Debug, Clone, Copy, Default)]
pub struct CapacityRange {
    pub required_bytes: u64,
    pub limit_bytes: u64,
}

pub struct VolumeService {
    config: Arc<Config>,
    lvm: Arc<dyn LvmDriver>,
    mounts: Arc<dyn MountAdapter>,
    metrics: Arc<dyn MetricsSink>,
}

impl VolumeService {
    pub fn new(
        config: Arc<Config>,
        lvm: Arc<dyn LvmDriver>,
        mounts: Arc<dyn MountAdapter>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            config,
            lvm,
            mounts,
            metrics,
        }
    }

    /// spec §4.2.1.
    pub async fn create_volume(
        &self,
        name: &str,
        capacity: Option<CapacityRange>,
    ) -> Result<LogicalVolume, CoreError> {
        self.lvm.validate_lv_name(name).map_err(|e| {
            CoreError::invalid_argument(format!("The volume name is invalid: err=lvm: {} (-1)", e))
        })?;

        let size = match capacity {
            None => self.config.default_volume_size,
            Some(range) => {
                if range.required_bytes == 0 && range.limit_bytes == 0 {
                    return Err(CoreError::invalid_argument("ErrCapacityRangeUnspecified"));
                }
                if range.limit_bytes != 0 && range.required_bytes > range.limit_bytes {
                    return Err(CoreError::invalid_argument(format!(
                        "required_bytes: {} cannot exceed the limit_bytes: {}",
                        range.required_bytes, range.limit_bytes
                    )));
                }
                let requested = if range.required_bytes > 0 {
                    range.required_bytes
                } else {
                    self.config.default_volume_size
                };
                if range.limit_bytes != 0 && requested > range.limit_bytes {
                    return Err(CoreError::invalid_argument(format!(
                        "required_bytes: {} cannot exceed the limit_bytes: {}",
                        requested, range.limit_bytes
                    )));
                }
                round_up_to_extent(requested)
            }
        };

        match self.lvm.lv_lookup(&self.config.volume_group_name, name).await {
            Ok(existing) => {
                if existing.capacity_bytes == size {
                    return Ok(existing);
                }
                return Err(CoreError::AlreadyExists(format!(
                    "volume '{}' already exists with capacity_bytes={}, requested {}",
                    name, existing.capacity_bytes, size
                )));
            }
            Err(LvmError::NotFound(_)) => {}
            Err(LvmError::Other(msg)) => return Err(CoreError::internal(msg)),
        }

        let free = free_bytes(
            self.lvm
                .vg_free_extents(&self.config.volume_group_name)
                .await
                .map_err(CoreError::from)?,
        );
        if size > free {
            return Err(CoreError::OutOfRange("ErrInsufficientCapacity".to_string()));
        }

        let lv = self
            .lvm
            .lv_create(&self.config.volume_group_name, name, size, &self.config.tags)
            .await
            .map_err(CoreError::from)?;

        self.metrics.record(Event::VolumeCreated {
            name: name.to_string(),
            capacity_bytes: size,
        });
        Ok(lv)
    }

    /// spec §4.2.2, §4.4.
    pub async fn delete_volume(&self, volume_id: &str) -> Result<(), CoreError> {
        let lv = match self.lvm.lv_lookup(&self.config.volume_group_name, volume_id).await {
            Ok(lv) => lv,
            Err(LvmError::NotFound(_)) => {
                return Err(CoreError::not_found(format!("ErrVolumeNotFound: {}", volume_id)));
            }
            Err(LvmError::Other(msg)) => return Err(CoreError::internal(msg)),
        };

        self.mounts
            .zero_device(&lv.device_path, lv.capacity_bytes)
            .await
            .map_err(CoreError::from)?;

        self.lvm
            .lv_remove(&self.config.volume_group_name, volume_id)
            .await
            .map_err(CoreError::from)?;

        self.metrics.record(Event::VolumeDeleted {
            name: volume_id.to_string(),
        });
        Ok(())
    }

    /// spec §4.2.3.
    pub async fn node_publish_volume(
        &self,
        volume_id: &str,
        target_path: &str,
        capability: &Capability,
        readonly: bool,
    ) -> Result<(), CoreError> {
        match self.lvm.lv_lookup(&self.config.volume_group_name, volume_id).await {
            Ok(_) => {}
            Err(LvmError::NotFound(_)) => {
                return Err(CoreError::not_found(format!("ErrVolumeNotFound: {}", volume_id)));
            }
            Err(LvmError::Other(msg)) => return Err(CoreError::internal(msg)),
        }
        let device = self
            .lvm
            .lv_device_path(&self.config.volume_group_name, volume_id)
            .await
            .map_err(CoreError::from)?;
        let device_str = device.display().to_string();

        let records = self.mounts.read_mountinfo().await.map_err(CoreError::from)?;
        if let Some(existing) = mountinfo::find_mount(&records, target_path, None) {
            return if existing.source == device_str {
                Ok(())
            } else {
                Err(CoreError::failed_precondition("ErrTargetPathNotEmpty"))
            };
        }

        let effective_readonly = readonly || matches!(capability.access_mode, AccessMode::SingleNodeReaderOnly);

        match &capability.access_type {
            AccessType::Block => {
                self.mounts
                    .bind_mount(&device, Path::new(target_path), effective_readonly)
                    .await
                    .map_err(CoreError::from)?;
            }
            AccessType::Mount { fs_type } => {
                let fs_type = if fs_type.is_empty() {
                    self.config.default_filesystem.clone()
                } else {
                    fs_type.clone()
                };
                if !self.config.supported_filesystems.iter().any(|f| f == &fs_type) {
                    return Err(CoreError::failed_precondition("ErrUnsupportedFilesystem"));
                }

                match self.mounts.probe_fs_type(&device).await.map_err(CoreError::from)? {
                    None => {
                        self.mounts.mkfs(&device, &fs_type).await.map_err(CoreError::from)?;
                    }
                    Some(existing_fs) if existing_fs == fs_type => {}
                    Some(_) => return Err(CoreError::failed_precondition("ErrMismatchedFilesystemType")),
                }

                self.mounts
                    .fs_mount(&device, Path::new(target_path), &fs_type, effective_readonly)
                    .await
                    .map_err(CoreError::from)?;
            }
        }

        self.metrics.record(Event::VolumePublished {
            volume_id: volume_id.to_string(),
            target_path: target_path.to_string(),
        });
        Ok(())
    }

    /// spec §4.2.4.
    pub async fn node_unpublish_volume(&self, volume_id: &str, target_path: &str) -> Result<(), CoreError> {
        let records = self.mounts.read_mountinfo().await.map_err(CoreError::from)?;
        if mountinfo::find_mount(&records, target_path, None).is_none() {
            return Ok(());
        }
        self.mounts
            .umount(Path::new(target_path))
            .await
            .map_err(CoreError::from)?;
        self.metrics.record(Event::VolumeUnpublished {
            volume_id: volume_id.to_string(),
            target_path: target_path.to_string(),
        });
        Ok(())
    }

    /// Resolves a single LV by name, for `ValidateVolumeCapabilities`.
    /// `NotFound` if no such LV exists in the managed VG.
    pub async fn get_volume(&self, volume_id: &str) -> Result<LogicalVolume, CoreError> {
        match self.lvm.lv_lookup(&self.config.volume_group_name, volume_id).await {
            Ok(lv) => Ok(lv),
            Err(LvmError::NotFound(_)) => {
                Err(CoreError::not_found(format!("ErrVolumeNotFound: {}", volume_id)))
            }
            Err(LvmError::Other(msg)) => Err(CoreError::internal(msg)),
        }
    }

    /// spec §4.2.5.
    pub async fn list_volumes(&self) -> Result<Vec<LogicalVolume>, CoreError> {
        let names = self
            .lvm
            .vg_list_lv_names(&self.config.volume_group_name)
            .await
            .map_err(CoreError::from)?;
        let mut volumes = Vec::with_capacity(names.len());
        for name in names {
            let lv = self
                .lvm
                .lv_lookup(&self.config.volume_group_name, &name)
                .await
                .map_err(CoreError::from)?;
            volumes.push(lv);
        }
        Ok(volumes)
    }

    /// spec §4.2.6, §4.3.
    pub async fn get_capacity(&self, capability: Option<&Capability>) -> Result<u64, CoreError> {
        if self.config.remove_mode {
            return Ok(0);
        }
        if let Some(Capability {
            access_type: AccessType::Mount { fs_type },
            ..
        }) = capability
        {
            if !fs_type.is_empty() && !self.config.supported_filesystems.iter().any(|f| f == fs_type) {
                return Ok(0);
            }
        }
        let free_extents = self
            .lvm
            .vg_free_extents(&self.config.volume_group_name)
            .await
            .map_err(CoreError::from)?;
        Ok(free_bytes(free_extents))
    }
}
