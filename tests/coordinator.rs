//! Flash coordinator and firmware resolver working together.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeSource, TestEnv, release_zip, version};
use kflashd::core::{
    FirmwareSource, FlashCoordinator, FlashRegion, FlashRequest, PortSelection, ResolvedFirmware,
    SimulatedFlasher,
};
use kflashd::error::{ErrorKind, FlashError};
use tokio::sync::Notify;

fn request(firmware: ResolvedFirmware) -> FlashRequest {
    FlashRequest {
        firmware,
        port: PortSelection::Device("/dev/ttyUSB0".into()),
        board: Some("goE".into()),
        baud_rate: 1_500_000,
        flash_region: FlashRegion::Spi0,
        sram: false,
        plain_output: true,
    }
}

fn upload(bytes: &[u8]) -> FirmwareSource {
    FirmwareSource::Upload {
        file_name: "firmware.bin".into(),
        bytes: bytes.to_vec(),
    }
}

#[tokio::test]
async fn concurrent_start_is_rejected_while_running() {
    let env = TestEnv::new(FakeSource::new());
    let resolver = env.resolver();
    let gate = Arc::new(Notify::new());
    let flasher = SimulatedFlasher::scripted(&["[INFO] Greeting", "Downloading: 50%"])
        .gated(gate.clone());
    let coordinator = Arc::new(FlashCoordinator::new(Arc::new(flasher)));

    let first = resolver.resolve(upload(b"first")).await.unwrap();
    let running = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run(request(first)).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while !coordinator.is_busy() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("first job never started");

    let second = resolver.resolve(upload(b"second")).await.unwrap();
    let err = coordinator.run(request(second)).await.unwrap_err();
    assert!(matches!(err, FlashError::JobAlreadyRunning));
    assert_eq!(err.kind(), ErrorKind::ResourceBusy);

    gate.notify_one();
    let outcome = running.await.unwrap().unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.log.len(), 3);
    assert!(outcome.log[0].contains("size=5"), "{:?}", outcome.log);
    assert_eq!(&outcome.log[1..], ["[INFO] Greeting", "Downloading: 50%"]);
    assert!(!coordinator.is_busy());
}

#[tokio::test]
async fn upload_workspaces_are_removed_on_every_path() {
    let env = TestEnv::new(FakeSource::new());
    let resolver = env.resolver();

    let ok = FlashCoordinator::new(Arc::new(SimulatedFlasher::scripted(&["done"])));
    let firmware = resolver.resolve(upload(b"fw")).await.unwrap();
    assert!(firmware.workspace().is_some());
    assert_eq!(env.leftover_uploads(), 1);
    assert!(ok.run(request(firmware)).await.unwrap().success);
    assert_eq!(env.leftover_uploads(), 0, "workspace left after success");

    let failing = FlashCoordinator::new(Arc::new(
        SimulatedFlasher::scripted(&["a"]).failing("Timeout"),
    ));
    let firmware = resolver.resolve(upload(b"fw")).await.unwrap();
    let outcome = failing.run(request(firmware)).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(env.leftover_uploads(), 0, "workspace left after failure");

    let busy = FlashCoordinator::new(Arc::new(SimulatedFlasher::scripted(&[])));
    let _permit = busy.try_begin().unwrap();
    let firmware = resolver.resolve(upload(b"fw")).await.unwrap();
    assert!(busy.run(request(firmware)).await.is_err());
    assert_eq!(env.leftover_uploads(), 0, "workspace left after rejection");
}

#[tokio::test]
async fn empty_upload_is_rejected_before_staging() {
    let env = TestEnv::new(FakeSource::new());
    let resolver = env.resolver();

    let err = resolver.resolve(upload(b"")).await.unwrap_err();
    assert!(matches!(err, FlashError::NoFirmware));

    let err = resolver
        .resolve(FirmwareSource::Upload {
            file_name: "  ".into(),
            bytes: b"fw".to_vec(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, FlashError::NoFirmware));
    assert_eq!(env.leftover_uploads(), 0);
}

#[tokio::test]
async fn upload_file_name_is_sanitized() {
    let env = TestEnv::new(FakeSource::new());
    let firmware = env
        .resolver()
        .resolve(FirmwareSource::Upload {
            file_name: "../../krux firmware.bin".into(),
            bytes: b"fw".to_vec(),
        })
        .await
        .unwrap();

    let workspace = firmware.workspace().unwrap().path().to_path_buf();
    assert_eq!(firmware.path, workspace.join("krux_firmware.bin"));
    assert!(workspace.starts_with(&env.upload_root));
    assert_eq!(std::fs::read(&firmware.path).unwrap(), b"fw");
}

#[tokio::test]
async fn release_firmware_is_resolved_from_cache() {
    let source = FakeSource::new().with_archive("v25.10.1", release_zip("v25.10.1", &["goE", "amigo"]));
    let env = TestEnv::new(source.clone());

    let firmware = env
        .resolver()
        .resolve(FirmwareSource::Release {
            version: version("v25.10.1"),
            board_id: "amigo".into(),
        })
        .await
        .unwrap();

    assert_eq!(
        firmware.path,
        env.cache_dir.join("krux-v25.10.1/amigo/firmware.bin")
    );
    assert_eq!(firmware.board_hint.as_deref(), Some("amigo"));
    assert!(firmware.workspace().is_none());

    let coordinator = FlashCoordinator::new(Arc::new(SimulatedFlasher::scripted(&["ok"])));
    let outcome = coordinator.run(request(firmware)).await.unwrap();
    assert!(outcome.success);
    assert!(
        env.cache_dir.join("krux-v25.10.1/amigo/firmware.bin").exists(),
        "cached firmware must survive a flash"
    );
    assert_eq!(source.fetch_count(), 1);
}

#[tokio::test]
async fn unknown_release_board_is_not_found() {
    let source = FakeSource::new().with_archive("v25.10.1", release_zip("v25.10.1", &["goE"]));
    let env = TestEnv::new(source);

    let err = env
        .resolver()
        .resolve(FirmwareSource::Release {
            version: version("v25.10.1"),
            board_id: "bit".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, FlashError::BoardNotFound { .. }), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn release_fetch_failure_surfaces_as_remote_failure() {
    let env = TestEnv::new(FakeSource::new());

    let err = env
        .resolver()
        .resolve(FirmwareSource::Release {
            version: version("v25.10.1"),
            board_id: "goE".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteFetchFailure);
}
