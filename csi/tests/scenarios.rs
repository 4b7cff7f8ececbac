//! Crate-level integration scenarios (spec §8, Scenarios A-D, G) run
//! against the in-memory `LvmDriver`/`MountAdapter` fakes so they don't
//! need root privileges or a real volume group. Scenarios E and F need
//! a real loop device / SCSI-debug device and a privileged mount, so
//! they live in `loopdev_zeroing.rs` behind `#[ignore]`.

use std::path::PathBuf;
use std::sync::Arc;

use csi_lvm::arbiter::Arbiter;
use csi_lvm::config::Config;
use csi_lvm::error::CoreError;
use csi_lvm::lvm::testutil::FakeLvmDriver;
use csi_lvm::metrics::LoggingMetricsSink;
use csi_lvm::mount::testutil::FakeMountAdapter;
use csi_lvm::volume::{CapacityRange, VolumeService};
use tokio_util::sync::CancellationToken;

fn config() -> Arc<Config> {
    Arc::new(Config {
        volume_group_name: "test-vg-A".to_string(),
        device_paths: vec![PathBuf::from("/dev/fake0")],
        default_filesystem: "ext4".to_string(),
        supported_filesystems: vec!["ext4".to_string(), "xfs".to_string()],
        tags: vec!["csi-lvm".to_string()],
        default_volume_size: 64 * 1024 * 1024,
        remove_mode: false,
        request_limit: 10,
        csi_endpoint: PathBuf::from("/tmp/csi.sock"),
        node_id: "node-1".to_string(),
    })
}

/// Scenario A: create/list/delete happy path (spec §8).
#[tokio::test]
async fn scenario_a_create_list_delete_happy_path() {
    let cfg = config();
    let driver = Arc::new(FakeLvmDriver::with_devices(&["/dev/fake0"]));
    driver
        .vg_create(&cfg.volume_group_name, &cfg.device_paths, &cfg.tags)
        .await
        .unwrap();
    let svc = VolumeService::new(
        cfg,
        driver,
        Arc::new(FakeMountAdapter::new()),
        Arc::new(LoggingMetricsSink),
    );

    let lv = svc
        .create_volume(
            "v1",
            Some(CapacityRange {
                required_bytes: 80 * 1024 * 1024,
                limit_bytes: 1000 * 1024 * 1024,
            }),
        )
        .await
        .unwrap();
    assert_eq!(lv.capacity_bytes, 80 * 1024 * 1024);

    let listed = svc.list_volumes().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "v1");

    svc.delete_volume("v1").await.unwrap();
    assert!(svc.list_volumes().await.unwrap().is_empty());
}

/// Scenario B: idempotent create.
#[tokio::test]
async fn scenario_b_idempotent_create() {
    let cfg = config();
    let driver = Arc::new(FakeLvmDriver::with_devices(&["/dev/fake0"]));
    driver
        .vg_create(&cfg.volume_group_name, &cfg.device_paths, &cfg.tags)
        .await
        .unwrap();
    let svc = VolumeService::new(
        cfg,
        driver,
        Arc::new(FakeMountAdapter::new()),
        Arc::new(LoggingMetricsSink),
    );

    let range = Some(CapacityRange {
        required_bytes: 40 * 1024 * 1024,
        limit_bytes: 0,
    });
    let first = svc.create_volume("v1", range).await.unwrap();
    let second = svc.create_volume("v1", range).await.unwrap();
    assert_eq!(first.capacity_bytes, second.capacity_bytes);
    assert_eq!(svc.list_volumes().await.unwrap().len(), 1);
}

/// Scenario C: insufficient capacity.
#[tokio::test]
async fn scenario_c_insufficient_capacity() {
    let cfg = config();
    let driver = Arc::new(FakeLvmDriver::with_devices(&["/dev/fake0"]));
    driver
        .vg_create(&cfg.volume_group_name, &cfg.device_paths, &cfg.tags)
        .await
        .unwrap();
    driver.set_free_extents(&cfg.volume_group_name, 10);
    let svc = VolumeService::new(
        cfg,
        driver,
        Arc::new(FakeMountAdapter::new()),
        Arc::new(LoggingMetricsSink),
    );

    let err = svc
        .create_volume(
            "v1",
            Some(CapacityRange {
                required_bytes: 200 * 1024 * 1024,
                limit_bytes: 0,
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::OutOfRange(_)));
}

/// Scenario D: invalid name.
#[tokio::test]
async fn scenario_d_invalid_name() {
    let cfg = config();
    let driver = Arc::new(FakeLvmDriver::with_devices(&["/dev/fake0"]));
    driver
        .vg_create(&cfg.volume_group_name, &cfg.device_paths, &cfg.tags)
        .await
        .unwrap();
    let svc = VolumeService::new(
        cfg,
        driver,
        Arc::new(FakeMountAdapter::new()),
        Arc::new(LoggingMetricsSink),
    );

    let err = svc.create_volume("invalid name : /", None).await.unwrap_err();
    match err {
        CoreError::InvalidArgument(msg) => {
            assert_eq!(
                msg,
                "The volume name is invalid: err=lvm: validateLogicalVolumeName: \
                 Name contains invalid character, valid set includes: [a-zA-Z0-9.-_+]. (-1)"
            );
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

/// Scenario G: 10 concurrent `CreateVolume` calls with identical
/// parameters perform exactly one `lvcreate`; all 10 callers observe
/// the same descriptor, through the arbiter's single-flight coalescing.
#[tokio::test]
async fn scenario_g_concurrent_identical_create_coalesces() {
    let cfg = config();
    let driver = Arc::new(FakeLvmDriver::with_devices(&["/dev/fake0"]));
    driver
        .vg_create(&cfg.volume_group_name, &cfg.device_paths, &cfg.tags)
        .await
        .unwrap();
    let svc = Arc::new(VolumeService::new(
        cfg,
        driver,
        Arc::new(FakeMountAdapter::new()),
        Arc::new(LoggingMetricsSink),
    ));
    let arbiter = Arc::new(Arbiter::new(10));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let svc = svc.clone();
        let arbiter = arbiter.clone();
        handles.push(tokio::spawn(async move {
            arbiter
                .call_mutating(
                    "new/v1".to_string(),
                    Some("nonce".to_string()),
                    CancellationToken::new(),
                    move || async move {
                        svc.create_volume(
                            "v1",
                            Some(CapacityRange {
                                required_bytes: 40 * 1024 * 1024,
                                limit_bytes: 0,
                            }),
                        )
                        .await
                    },
                )
                .await
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }
    assert_eq!(results.len(), 10);
    for lv in &results {
        assert_eq!(lv.name, "v1");
        assert_eq!(lv.capacity_bytes, 40 * 1024 * 1024);
    }
    assert_eq!(svc.list_volumes().await.unwrap().len(), 1);
}

/// Scenario G, second half: a request-limit of 5 admits at most 5
/// concurrent mutating calls; the remainder receive `Unavailable`.
#[tokio::test]
async fn scenario_g_request_limit_rejects_overflow() {
    let cfg = config();
    let driver = Arc::new(FakeLvmDriver::with_devices(&["/dev/fake0"]));
    driver
        .vg_create(&cfg.volume_group_name, &cfg.device_paths, &cfg.tags)
        .await
        .unwrap();
    let arbiter = Arc::new(Arbiter::new(5));

    let (release_tx, _release_rx) = tokio::sync::broadcast::channel::<()>(1);
    let mut handles = Vec::new();
    for i in 0..10 {
        let arbiter = arbiter.clone();
        let mut release_rx = release_tx.subscribe();
        handles.push(tokio::spawn(async move {
            arbiter
                .call_mutating(
                    format!("distinct/{}", i),
                    None,
                    CancellationToken::new(),
                    move || async move {
                        let _ = release_rx.recv().await;
                        Ok::<(), CoreError>(())
                    },
                )
                .await
        }));
    }

    // Let all ten attempt admission before releasing any of them.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let _ = release_tx.send(());

    let mut ok = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => ok += 1,
            Err(CoreError::Unavailable(_)) => rejected += 1,
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }
    assert!(ok >= 5, "expected at least 5 admitted calls, got {}", ok);
    assert_eq!(ok + rejected, 10);
}
