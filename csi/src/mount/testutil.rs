//! In-memory `MountAdapter` fake used by `volume`/`probe` unit tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{MountAdapter, MountRecord};
use crate::error::MountError;

#[derive(Default)]
struct State {
    records: Vec<MountRecord>,
    fs_types: HashMap<PathBuf, String>,
    missing_devices: HashSet<PathBuf>,
}

#[derive(Default)]
pub struct FakeMountAdapter {
    state: Mutex<State>,
    mount_calls: AtomicUsize,
    mkfs_calls: AtomicUsize,
    unmount_calls: AtomicUsize,
}

impl FakeMountAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fs_type(&self, device: &str, fstype: &str) {
        self.state
            .lock()
            .unwrap()
            .fs_types
            .insert(PathBuf::from(device), fstype.to_string());
    }

    pub fn mark_device_missing(&self, device: &str) {
        self.state.lock().unwrap().missing_devices.insert(PathBuf::from(device));
    }

    pub fn mount_calls(&self) -> usize {
        self.mount_calls.load(Ordering::SeqCst)
    }

    pub fn mkfs_calls(&self) -> usize {
        self.mkfs_calls.load(Ordering::SeqCst)
    }

    pub fn unmount_calls(&self) -> usize {
        self.unmount_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MountAdapter for FakeMountAdapter {
    async fn read_mountinfo(&self) -> Result<Vec<MountRecord>, MountError> {
        Ok(self.state.lock().unwrap().records.clone())
    }

    async fn bind_mount(&self, src_file: &Path, dst_file: &Path, readonly: bool) -> Result<(), MountError> {
        self.mount_calls.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().records.push(MountRecord {
            root: "/".to_string(),
            path: dst_file.display().to_string(),
            fstype: String::new(),
            options: vec![if readonly { "ro".to_string() } else { "rw".to_string() }],
            source: src_file.display().to_string(),
        });
        Ok(())
    }

    async fn fs_mount(&self, device: &Path, dir: &Path, fstype: &str, readonly: bool) -> Result<(), MountError> {
        self.mount_calls.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().records.push(MountRecord {
            root: "/".to_string(),
            path: dir.display().to_string(),
            fstype: fstype.to_string(),
            options: vec![if readonly { "ro".to_string() } else { "rw".to_string() }],
            source: device.display().to_string(),
        });
        Ok(())
    }

    async fn umount(&self, path: &Path) -> Result<(), MountError> {
        self.unmount_calls.fetch_add(1, Ordering::SeqCst);
        let target = path.display().to_string();
        self.state.lock().unwrap().records.retain(|r| r.path != target);
        Ok(())
    }

    async fn probe_fs_type(&self, device: &Path) -> Result<Option<String>, MountError> {
        Ok(self.state.lock().unwrap().fs_types.get(device).cloned())
    }

    async fn mkfs(&self, device: &Path, fstype: &str) -> Result<(), MountError> {
        self.mkfs_calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .fs_types
            .insert(device.to_path_buf(), fstype.to_string());
        Ok(())
    }

    async fn zero_sector(&self, _device: &Path) -> Result<(), MountError> {
        Ok(())
    }

    async fn zero_device(&self, _device: &Path, _capacity_bytes: u64) -> Result<(), MountError> {
        Ok(())
    }

    async fn device_exists(&self, device: &Path) -> Result<bool, MountError> {
        Ok(!self.state.lock().unwrap().missing_devices.contains(device))
    }
}
