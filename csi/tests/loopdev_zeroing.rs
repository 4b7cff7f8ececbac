//! Scenario E (spec §8): deleting a volume zeroes its full extent, so a
//! freshly created replacement never exposes a previous tenant's bytes.
//! Exercises the real `lvm2` toolchain and a loop device, so it needs
//! root and is skipped by default.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use csi_lvm::config::Config;
use csi_lvm::lvm::cli::CliLvmDriver;
use csi_lvm::lvm::LvmDriver;
use csi_lvm::metrics::LoggingMetricsSink;
use csi_lvm::mount::{MountAdapter, SysMountAdapter};
use csi_lvm::validator::{AccessMode, AccessType, Capability};
use csi_lvm::volume::{CapacityRange, VolumeService};
use loopdev::LoopControl;
use serial_test::serial;

const IMAGE_SIZE_BYTES: u64 = 128 * 1024 * 1024;

fn config(vg: &str, device: PathBuf) -> Arc<Config> {
    Arc::new(Config {
        volume_group_name: vg.to_string(),
        device_paths: vec![device],
        default_filesystem: "xfs".to_string(),
        supported_filesystems: vec!["xfs".to_string(), "ext4".to_string()],
        tags: vec!["csi-lvm-test".to_string()],
        default_volume_size: 32 * 1024 * 1024,
        remove_mode: false,
        request_limit: 10,
        csi_endpoint: PathBuf::from("/tmp/csi-lvm-loopdev-test.sock"),
        node_id: "test-node".to_string(),
    })
}

/// Scenario E: fill a published volume with 0x01 bytes, delete it, then
/// confirm a replacement volume reads back as all zeros for its full
/// capacity — the zeroing-on-delete rollback behavior in spec §4.4.
#[tokio::test]
#[ignore = "requires root and a real lvm2 installation"]
#[serial]
async fn scenario_e_delete_zeroes_full_extent() {
    let image = tempfile::NamedTempFile::new().unwrap();
    image.as_file().set_len(IMAGE_SIZE_BYTES).unwrap();

    let control = LoopControl::open().unwrap();
    let loopdev = control.next_free().unwrap();
    loopdev.attach_file(image.path()).unwrap();
    let device_path = loopdev.path().unwrap();

    let cfg = config("csi-lvm-test-vg-e", device_path.clone());
    let lvm = Arc::new(CliLvmDriver::new());
    lvm.pv_create(&device_path).await.unwrap();
    lvm.vg_create(&cfg.volume_group_name, &cfg.device_paths, &cfg.tags)
        .await
        .unwrap();

    let mounts = Arc::new(SysMountAdapter::new());
    let svc = VolumeService::new(cfg.clone(), lvm.clone(), mounts.clone(), Arc::new(LoggingMetricsSink));

    let target = tempfile::tempdir().unwrap();
    let target_path = target.path().join("v1");
    std::fs::create_dir_all(&target_path).unwrap();

    let cap = Capability {
        access_type: AccessType::Mount {
            fs_type: "xfs".to_string(),
        },
        access_mode: AccessMode::SingleNodeWriter,
    };

    let lv = svc
        .create_volume(
            "v1",
            Some(CapacityRange {
                required_bytes: 32 * 1024 * 1024,
                limit_bytes: 0,
            }),
        )
        .await
        .unwrap();
    svc.node_publish_volume("v1", target_path.to_str().unwrap(), &cap, false)
        .await
        .unwrap();

    // Fill the mount with 0x01 bytes until ENOSPC.
    let fill_path = target_path.join("fill");
    {
        let mut file = std::fs::File::create(&fill_path).unwrap();
        let chunk = vec![0x01u8; 1024 * 1024];
        loop {
            match file.write_all(&chunk) {
                Ok(()) => {}
                Err(e) if e.raw_os_error() == Some(libc::ENOSPC) => break,
                Err(e) => panic!("unexpected write error: {}", e),
            }
        }
    }

    svc.node_unpublish_volume("v1", target_path.to_str().unwrap())
        .await
        .unwrap();
    svc.delete_volume("v1").await.unwrap();

    let lv2 = svc
        .create_volume(
            "v1-2",
            Some(CapacityRange {
                required_bytes: lv.capacity_bytes,
                limit_bytes: 0,
            }),
        )
        .await
        .unwrap();

    let device = lvm
        .lv_device_path(&cfg.volume_group_name, "v1-2")
        .await
        .unwrap();
    let mut raw = std::fs::File::open(&device).unwrap();
    let mut buf = vec![0u8; 1024 * 1024];
    let mut total_read = 0u64;
    loop {
        let n = raw.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        assert!(buf[..n].iter().all(|b| *b == 0), "found non-zero byte in replacement volume");
        total_read += n as u64;
    }
    assert_eq!(total_read, lv2.capacity_bytes);

    svc.delete_volume("v1-2").await.unwrap();
    lvm.vg_remove(&cfg.volume_group_name).await.unwrap();
    lvm.pv_remove(&device_path).await.unwrap();
    loopdev.detach().unwrap();
}

/// Scenario F: a PV that disappears from LVM's metadata while a volume
/// is mounted surfaces as `FailedPrecondition` on the next `Probe`.
#[tokio::test]
#[ignore = "requires root, a real lvm2 installation, and scsi_debug"]
#[serial]
async fn scenario_f_probe_detects_lost_pv() {
    let image = tempfile::NamedTempFile::new().unwrap();
    image.as_file().set_len(IMAGE_SIZE_BYTES).unwrap();

    let control = LoopControl::open().unwrap();
    let loopdev = control.next_free().unwrap();
    loopdev.attach_file(image.path()).unwrap();
    let device_path = loopdev.path().unwrap();

    let cfg = config("csi-lvm-test-vg-f", device_path.clone());
    let lvm = Arc::new(CliLvmDriver::new());
    let modules = Arc::new(csi_lvm::modules::ProcModulesInventory::new());
    let mounts = Arc::new(SysMountAdapter::new());
    let probe = csi_lvm::probe::Probe::new(cfg.clone(), lvm.clone(), mounts, modules);
    probe.run().await.unwrap();

    // Detach the loop device to simulate the PV vanishing underneath LVM.
    loopdev.detach().unwrap();

    let err = probe.run().await.unwrap_err();
    assert!(matches!(err, csi_lvm::error::CoreError::FailedPrecondition(_)));
}
