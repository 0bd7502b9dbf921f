// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! Disconnect, bounded reconnection and re-probing.

use std::thread;
use std::time::Duration;

use cctv_sentinel::{CameraHandle, CameraRegistry, CameraState, SentinelConfig};

use super::support::*;

fn state(registry: &CameraRegistry, id: &str) -> CameraState {
    registry.camera_status(id).unwrap().state
}

#[test]
fn test_three_failed_attempts_mark_camera_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    let cam = connector.add("fake://a", true, true);
    let (registry, _alerts) = CameraRegistry::builder(test_config(dir.path()), connector)
        .build()
        .unwrap();
    registry
        .register(CameraHandle::new("a", "fake://a", fallen_labels()))
        .unwrap();
    assert!(registry.camera_status("a").unwrap().connected);

    cam.set_online(false);
    assert!(wait_until(Duration::from_secs(5), || {
        state(&registry, "a") == CameraState::Unavailable
    }));
    // 注册探测 1 次 + 重连 3 次
    assert_eq!(cam.opens(), 4);
    assert!(!registry.camera_status("a").unwrap().connected);

    // 冷却窗口内不再尝试
    thread::sleep(Duration::from_millis(300));
    assert_eq!(cam.opens(), 4);
    assert_eq!(state(&registry, "a"), CameraState::Unavailable);
}

#[test]
fn test_manual_reprobe_grants_fresh_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    let cam = connector.add("fake://a", true, true);
    let (registry, _alerts) = CameraRegistry::builder(test_config(dir.path()), connector)
        .build()
        .unwrap();
    registry
        .register(CameraHandle::new("a", "fake://a", fallen_labels()))
        .unwrap();

    cam.set_online(false);
    assert!(wait_until(Duration::from_secs(5), || {
        state(&registry, "a") == CameraState::Unavailable
    }));

    // 仍然离线: 再失败 3 次后回到不可用
    registry.request_reprobe("a").unwrap();
    assert!(wait_until(Duration::from_secs(5), || cam.opens() == 7));
    assert!(wait_until(Duration::from_secs(5), || {
        state(&registry, "a") == CameraState::Unavailable
    }));

    cam.set_online(true);
    registry.request_reprobe("a").unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        state(&registry, "a") == CameraState::Streaming && registry.latest_frame("a").is_some()
    }));
    assert!(registry.camera_status("a").unwrap().connected);
}

#[test]
fn test_refresh_retries_only_after_window() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    let cam = connector.add("fake://a", true, true);
    let config = SentinelConfig {
        reconnect_window_secs: 0.3,
        ..test_config(dir.path())
    };
    let (registry, _alerts) = CameraRegistry::builder(config, connector).build().unwrap();
    let store = MemoryStore::default();
    let handle = CameraHandle::new("a", "fake://a", fallen_labels());
    store.set(vec![handle.clone()]);
    registry.register(handle).unwrap();

    cam.set_online(false);
    assert!(wait_until(Duration::from_secs(5), || {
        state(&registry, "a") == CameraState::Unavailable
    }));
    let opens = cam.opens();

    // 窗口内的刷新不会触发重试
    let report = registry.refresh(&store).unwrap();
    assert_eq!(report.reprobed, vec!["a".to_string()]);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(cam.opens(), opens);

    cam.set_online(true);
    thread::sleep(Duration::from_millis(400));
    registry.refresh(&store).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        state(&registry, "a") == CameraState::Streaming
    }));
    assert_eq!(cam.opens(), opens + 1);
}
