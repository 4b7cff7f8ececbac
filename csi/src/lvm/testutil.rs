//! In-memory `LvmDriver` fake used by `probe`/`volume` unit tests, so
//! reconciliation logic can be exercised without a real `lvm2` install.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{LogicalVolume, LvmDriver, LvmError, PhysicalVolume, VolumeGroup};

/// Generous default headroom (~20 GiB) so ordinary test volumes never
/// trip the capacity check; tests exercising `OutOfRange` override it
/// with [`FakeLvmDriver::set_free_extents`].
const DEFAULT_FREE_EXTENTS: u64 = 10_000;

fn extents_for(bytes: u64) -> u64 {
    (bytes + crate::capacity::EXTENT_SIZE - 1) / crate::capacity::EXTENT_SIZE
}

#[derive(Default)]
struct Inner {
    pvs: HashMap<PathBuf, Option<String>>,
    vgs: HashMap<String, (Vec<String>, Vec<PathBuf>)>,
    lvs: HashMap<(String, String), (Vec<String>, u64)>,
    free_extents: HashMap<String, u64>,
}

pub struct FakeLvmDriver {
    inner: Mutex<Inner>,
    pv_create_calls: AtomicUsize,
    vg_create_calls: AtomicUsize,
}

impl FakeLvmDriver {
    /// A fresh fake with no PVs, VGs or LVs registered. `devices` names
    /// the raw device nodes the test cares about; they start out unknown
    /// to LVM, so a probe against them exercises the `pvcreate` path.
    pub fn with_devices(devices: &[&str]) -> Self {
        let _ = devices;
        Self {
            inner: Mutex::new(Inner::default()),
            pv_create_calls: AtomicUsize::new(0),
            vg_create_calls: AtomicUsize::new(0),
        }
    }

    pub fn assign_pv_to_vg(&self, device: &str, vg: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.pvs.insert(PathBuf::from(device), Some(vg.to_string()));
    }

    /// Simulates a PV vanishing from LVM's metadata cache while the
    /// device node itself may still be present (spec §4.7).
    pub fn simulate_pv_lost(&self, device: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.pvs.remove(&PathBuf::from(device));
    }

    pub fn add_device(&self, device: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.pvs.insert(PathBuf::from(device), None);
    }

    pub fn pv_create_calls(&self) -> usize {
        self.pv_create_calls.load(Ordering::SeqCst)
    }

    pub fn vg_create_calls(&self) -> usize {
        self.vg_create_calls.load(Ordering::SeqCst)
    }

    /// Overrides the free-extent count of an already-created VG, for
    /// tests exercising `OutOfRange` (spec Scenario C).
    pub fn set_free_extents(&self, vg: &str, extents: u64) {
        self.inner.lock().unwrap().free_extents.insert(vg.to_string(), extents);
    }
}

#[async_trait]
impl LvmDriver for FakeLvmDriver {
    async fn pv_scan(&self) -> Result<(), LvmError> {
        Ok(())
    }

    async fn pv_create(&self, device: &Path) -> Result<(), LvmError> {
        let mut inner = self.inner.lock().unwrap();
        inner.pvs.insert(device.to_path_buf(), None);
        self.pv_create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pv_remove(&self, device: &Path) -> Result<(), LvmError> {
        let mut inner = self.inner.lock().unwrap();
        inner.pvs.remove(device);
        Ok(())
    }

    async fn pv_lookup(&self, device: &Path) -> Result<PhysicalVolume, LvmError> {
        let inner = self.inner.lock().unwrap();
        match inner.pvs.get(device) {
            Some(vg) => Ok(PhysicalVolume {
                device_path: device.to_path_buf(),
                volume_group: vg.clone(),
            }),
            None => Err(LvmError::NotFound(format!(
                "physical volume not found: {}",
                device.display()
            ))),
        }
    }

    async fn vg_create(&self, name: &str, pvs: &[PathBuf], tags: &[String]) -> Result<(), LvmError> {
        let mut inner = self.inner.lock().unwrap();
        for pv in pvs {
            inner.pvs.insert(pv.clone(), Some(name.to_string()));
        }
        inner.vgs.insert(name.to_string(), (tags.to_vec(), pvs.to_vec()));
        self.vg_create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn vg_lookup(&self, name: &str) -> Result<VolumeGroup, LvmError> {
        let inner = self.inner.lock().unwrap();
        let (tags, pvs) = inner
            .vgs
            .get(name)
            .ok_or_else(|| LvmError::NotFound(format!("volume group not found: {}", name)))?;
        Ok(VolumeGroup {
            name: name.to_string(),
            physical_volumes: pvs.clone(),
            tags: tags.clone(),
        })
    }

    async fn vg_remove(&self, name: &str) -> Result<(), LvmError> {
        let mut inner = self.inner.lock().unwrap();
        inner.vgs.remove(name);
        Ok(())
    }

    async fn vg_tags(&self, vg: &str) -> Result<Vec<String>, LvmError> {
        Ok(self.vg_lookup(vg).await?.tags)
    }

    async fn vg_list_lv_names(&self, vg: &str) -> Result<Vec<String>, LvmError> {
        let inner = self.inner.lock().unwrap();
        if !inner.vgs.contains_key(vg) {
            return Err(LvmError::NotFound(format!("volume group not found: {}", vg)));
        }
        Ok(inner
            .lvs
            .keys()
            .filter(|(v, _)| v == vg)
            .map(|(_, lv)| lv.clone())
            .collect())
    }

    async fn vg_free_extents(&self, vg: &str) -> Result<u64, LvmError> {
        let inner = self.inner.lock().unwrap();
        if !inner.vgs.contains_key(vg) {
            return Err(LvmError::NotFound(format!("volume group not found: {}", vg)));
        }
        Ok(inner
            .free_extents
            .get(vg)
            .copied()
            .unwrap_or(DEFAULT_FREE_EXTENTS))
    }

    async fn lv_create(&self, vg: &str, name: &str, bytes: u64, tags: &[String]) -> Result<LogicalVolume, LvmError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .lvs
            .insert((vg.to_string(), name.to_string()), (tags.to_vec(), bytes));
        Ok(LogicalVolume {
            name: name.to_string(),
            volume_group: vg.to_string(),
            capacity_bytes: bytes,
            tags: tags.to_vec(),
            device_path: PathBuf::from(format!("/dev/{}/{}", vg, name)),
        })
    }

    async fn lv_lookup(&self, vg: &str, name: &str) -> Result<LogicalVolume, LvmError> {
        let inner = self.inner.lock().unwrap();
        let (tags, bytes) = inner
            .lvs
            .get(&(vg.to_string(), name.to_string()))
            .ok_or_else(|| LvmError::NotFound(format!("logical volume not found: {}/{}", vg, name)))?;
        Ok(LogicalVolume {
            name: name.to_string(),
            volume_group: vg.to_string(),
            capacity_bytes: *bytes,
            tags: tags.clone(),
            device_path: PathBuf::from(format!("/dev/{}/{}", vg, name)),
        })
    }

    async fn lv_remove(&self, vg: &str, name: &str) -> Result<(), LvmError> {
        let mut inner = self.inner.lock().unwrap();
        inner.lvs.remove(&(vg.to_string(), name.to_string()));
        Ok(())
    }

    async fn lv_tags(&self, vg: &str, name: &str) -> Result<Vec<String>, LvmError> {
        Ok(self.lv_lookup(vg, name).await?.tags)
    }

    async fn lv_device_path(&self, vg: &str, name: &str) -> Result<PathBuf, LvmError> {
        Ok(PathBuf::from(format!("/dev/{}/{}", vg, name)))
    }

    fn validate_lv_name(&self, name: &str) -> Result<(), String> {
        super::validate_lv_name(name)
    }

    fn validate_tag(&self, tag: &str) -> Result<(), String> {
        super::validate_tag(tag)
    }
}
