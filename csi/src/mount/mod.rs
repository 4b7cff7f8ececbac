//! Mount adapter (spec §2 component 2, §6): parses
//! `/proc/self/mountinfo`, bind-mounts block devices onto file targets,
//! filesystem-mounts them onto directory targets, and invokes `mkfs`
//! when a target device is unformatted.

pub mod mountinfo;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::MountError;
pub use mountinfo::MountRecord;

#[async_trait]
pub trait MountAdapter: Send + Sync {
    async fn read_mountinfo(&self) -> Result<Vec<MountRecord>, MountError>;
    async fn bind_mount(&self, src_file: &Path, dst_file: &Path, readonly: bool) -> Result<(), MountError>;
    async fn fs_mount(
        &self,
        device: &Path,
        dir: &Path,
        fstype: &str,
        readonly: bool,
    ) -> Result<(), MountError>;
    async fn umount(&self, path: &Path) -> Result<(), MountError>;
    async fn probe_fs_type(&self, device: &Path) -> Result<Option<String>, MountError>;
    async fn mkfs(&self, device: &Path, fstype: &str) -> Result<(), MountError>;
    async fn zero_sector(&self, device: &Path) -> Result<(), MountError>;
    /// Writes zeros sequentially to `device` until the first write fails
    /// with `ENOSPC` (spec §4.4). `capacity_bytes` is used only to assert
    /// that a suspiciously small prefix wasn't written before running out
    /// of room.
    async fn zero_device(&self, device: &Path, capacity_bytes: u64) -> Result<(), MountError>;
    async fn device_exists(&self, device: &Path) -> Result<bool, MountError>;
}

#[derive(Debug, Default, Clone)]
pub struct SysMountAdapter;

impl SysMountAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MountAdapter for SysMountAdapter {
    async fn read_mountinfo(&self) -> Result<Vec<MountRecord>, MountError> {
        let contents = tokio::fs::read_to_string("/proc/self/mountinfo")
            .await
            .map_err(|e| MountError::Io(format!("reading /proc/self/mountinfo: {}", e)))?;
        mountinfo::parse(&contents).map_err(MountError::Io)
    }

    async fn bind_mount(&self, src_file: &Path, dst_file: &Path, readonly: bool) -> Result<(), MountError> {
        let src = src_file.to_path_buf();
        let dst = dst_file.to_path_buf();
        tokio::task::spawn_blocking(move || {
            use sys_mount::{Mount, MountFlags, UnmountDrop, UnmountFlags};
            let mut flags = MountFlags::BIND;
            if readonly {
                flags |= MountFlags::RDONLY;
            }
            let mount = Mount::builder()
                .flags(flags)
                .mount(&src, &dst)
                .map_err(|e| MountError::Io(format!("bind mount {:?} -> {:?}: {}", src, dst, e)))?;
            // the unmount guard is intentionally leaked: the mount must
            // outlive this call, the publication is torn down explicitly
            // by NodeUnpublishVolume.
            let guard: UnmountDrop<Mount> = mount.into_unmount_drop(UnmountFlags::DETACH);
            std::mem::forget(guard);
            Ok(())
        })
        .await
        .map_err(|e| MountError::Io(format!("join error: {}", e)))?
    }

    async fn fs_mount(
        &self,
        device: &Path,
        dir: &Path,
        fstype: &str,
        readonly: bool,
    ) -> Result<(), MountError> {
        let device = device.to_path_buf();
        let dir = dir.to_path_buf();
        let fstype = fstype.to_string();
        tokio::task::spawn_blocking(move || {
            use sys_mount::{Mount, MountFlags, UnmountDrop, UnmountFlags};
            let mut flags = MountFlags::empty();
            if readonly {
                flags |= MountFlags::RDONLY;
            }
            let mount = Mount::builder()
                .fstype(fstype.as_str())
                .flags(flags)
                .mount(&device, &dir)
                .map_err(|e| MountError::Io(format!("mount {:?} -> {:?}: {}", device, dir, e)))?;
            let guard: UnmountDrop<Mount> = mount.into_unmount_drop(UnmountFlags::DETACH);
            std::mem::forget(guard);
            Ok(())
        })
        .await
        .map_err(|e| MountError::Io(format!("join error: {}", e)))?
    }

    async fn umount(&self, path: &Path) -> Result<(), MountError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            sys_mount::unmount(&path, sys_mount::UnmountFlags::empty())
                .map_err(|e| MountError::Io(format!("umount {:?}: {}", path, e)))
        })
        .await
        .map_err(|e| MountError::Io(format!("join error: {}", e)))?
    }

    async fn probe_fs_type(&self, device: &Path) -> Result<Option<String>, MountError> {
        let device_str = device.to_string_lossy().to_string();
        let output = Command::new("blkid")
            .args(["-o", "value", "-s", "TYPE", &device_str])
            .output()
            .await
            .map_err(|e| MountError::Io(format!("exec blkid: {}", e)))?;

        // blkid exits 2 when the device carries no recognizable signature.
        if !output.status.success() {
            return Ok(None);
        }
        let fstype = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if fstype.is_empty() {
            Ok(None)
        } else {
            Ok(Some(fstype))
        }
    }

    async fn mkfs(&self, device: &Path, fstype: &str) -> Result<(), MountError> {
        let device_str = device.to_string_lossy().to_string();
        let mkfs_bin = format!("mkfs.{}", fstype);
        let output = Command::new(&mkfs_bin)
            .arg(&device_str)
            .output()
            .await
            .map_err(|e| MountError::Io(format!("exec {}: {}", mkfs_bin, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(MountError::Io(format!("{} {}: {}", mkfs_bin, device_str, stderr)));
        }
        Ok(())
    }

    async fn zero_sector(&self, device: &Path) -> Result<(), MountError> {
        use std::io::{Seek, SeekFrom, Write};
        let device = device.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut f = std::fs::OpenOptions::new()
                .write(true)
                .open(&device)
                .map_err(|e| MountError::Io(format!("open {:?}: {}", device, e)))?;
            f.seek(SeekFrom::Start(0))
                .map_err(|e| MountError::Io(format!("seek {:?}: {}", device, e)))?;
            f.write_all(&[0u8; 512])
                .map_err(|e| MountError::Io(format!("write {:?}: {}", device, e)))?;
            Ok(())
        })
        .await
        .map_err(|e| MountError::Io(format!("join error: {}", e)))?
    }

    async fn zero_device(&self, device: &Path, capacity_bytes: u64) -> Result<(), MountError> {
        use std::io::Write;
        let device = device.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut f = std::fs::OpenOptions::new()
                .write(true)
                .open(&device)
                .map_err(|e| MountError::Io(format!("open {:?}: {}", device, e)))?;
            let buf = vec![0u8; 1024 * 1024];
            let mut written: u64 = 0;
            loop {
                match f.write(&buf) {
                    Ok(0) => break,
                    Ok(n) => written += n as u64,
                    Err(e) if e.raw_os_error() == Some(libc::ENOSPC) => break,
                    Err(e) => {
                        return Err(MountError::Io(format!("zeroing {:?}: {}", device, e)));
                    }
                }
            }
            if written < capacity_bytes / 2 {
                return Err(MountError::Io(format!(
                    "zeroing {:?}: only wrote {} of {} expected bytes before running out of space",
                    device, written, capacity_bytes
                )));
            }
            Ok(())
        })
        .await
        .map_err(|e| MountError::Io(format!("join error: {}", e)))?
    }

    async fn device_exists(&self, device: &Path) -> Result<bool, MountError> {
        match tokio::fs::metadata(device).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MountError::Io(format!("stat {:?}: {}", device, e))),
        }
    }
}
