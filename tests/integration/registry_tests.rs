// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! Registry lifecycle: register, unregister, refresh and queries.

use std::time::Duration;

use cctv_sentinel::{CameraHandle, CameraRegistry, CameraState, SentinelConfig, SentinelError};

use super::support::*;

fn registry(config: SentinelConfig, connector: std::sync::Arc<FakeConnector>) -> CameraRegistry {
    CameraRegistry::builder(config, connector).build().unwrap().0
}

#[test]
fn test_register_without_first_frame_creates_no_state() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    let silent = connector.add("fake://silent", true, false);
    let registry = registry(test_config(dir.path()), connector);

    let err = registry
        .register(CameraHandle::new("silent", "fake://silent", fallen_labels()))
        .unwrap_err();
    assert!(matches!(err, SentinelError::ConnectionFailed { ref camera_id, .. } if camera_id == "silent"));
    assert_eq!(silent.opens(), 1);

    let err = registry
        .register(CameraHandle::new("ghost", "fake://nowhere", fallen_labels()))
        .unwrap_err();
    assert!(matches!(err, SentinelError::ConnectionFailed { .. }));

    assert!(registry.camera_ids().unwrap().is_empty());
    assert!(registry.latest_frame("silent").is_none());
    assert!(matches!(
        registry.camera_status("silent"),
        Err(SentinelError::CameraNotFound(_))
    ));
}

#[test]
fn test_duplicate_registration_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    let cam = connector.add("fake://a", true, true);
    let registry = registry(test_config(dir.path()), connector);

    registry
        .register(CameraHandle::new("a", "fake://a", fallen_labels()))
        .unwrap();
    let err = registry
        .register(CameraHandle::new("a", "fake://a", fallen_labels()))
        .unwrap_err();
    assert!(matches!(err, SentinelError::DuplicateCamera(ref id) if id == "a"));
    // 重复注册不会再打开源
    assert_eq!(cam.opens(), 1);
    assert_eq!(registry.camera_ids().unwrap(), vec!["a".to_string()]);
}

#[test]
fn test_unregister_is_idempotent_and_clears_state() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    connector.add("fake://a", true, true);
    let registry = registry(test_config(dir.path()), connector);

    registry
        .register(CameraHandle::new("a", "fake://a", fallen_labels()))
        .unwrap();
    let frame = registry.latest_frame("a").unwrap();
    assert_eq!(frame.dimensions(), (FRAME_W, FRAME_H));
    assert_eq!(registry.camera_status("a").unwrap().state, CameraState::Streaming);

    registry.unregister("a").unwrap();
    registry.unregister("a").unwrap();
    registry.unregister("never-registered").unwrap();
    assert!(registry.latest_frame("a").is_none());
    assert!(registry.camera_ids().unwrap().is_empty());

    // 注销后可以重新注册
    registry
        .register(CameraHandle::new("a", "fake://a", fallen_labels()))
        .unwrap();
    assert_eq!(registry.camera_ids().unwrap().len(), 1);
}

#[test]
fn test_latest_frame_goes_stale() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    let cam = connector.add("fake://a", true, true);
    let config = SentinelConfig {
        freshness_secs: 0.2,
        ..test_config(dir.path())
    };
    let registry = registry(config, connector);

    registry
        .register(CameraHandle::new("a", "fake://a", fallen_labels()))
        .unwrap();
    assert!(registry.latest_jpeg("a").unwrap().is_some());

    cam.set_online(false);
    assert!(wait_until(Duration::from_secs(3), || registry.latest_frame("a").is_none()));
    assert!(registry.latest_jpeg("a").unwrap().is_none());
    assert!(matches!(
        registry.latest_jpeg("missing"),
        Err(SentinelError::CameraNotFound(_))
    ));
}

#[test]
fn test_refresh_reconciles_with_store() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    connector.add("fake://a", true, true);
    connector.add("fake://a2", true, true);
    connector.add("fake://b", true, true);
    let registry = registry(test_config(dir.path()), connector);
    let store = MemoryStore::default();

    let a = CameraHandle::new("a", "fake://a", fallen_labels());
    let b = CameraHandle::new("b", "fake://b", fallen_labels());
    store.set(vec![a.clone(), b]);
    let report = registry.refresh(&store).unwrap();
    assert_eq!(report.added, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(registry.camera_ids().unwrap(), vec!["a", "b"]);

    // 无变化时报告为空
    assert!(registry.refresh(&store).unwrap().is_empty());

    // 删除 b, a 改名改标签, 新增一个连不上的 c
    let mut a2 = a.clone();
    a2.name = "Lobby".to_string();
    a2.labels = labels(&[("sitting", "a sitting person", false)]);
    let c = CameraHandle::new("c", "fake://offline", fallen_labels());
    store.set(vec![a2.clone(), c]);
    let report = registry.refresh(&store).unwrap();
    assert_eq!(report.removed, vec!["b".to_string()]);
    assert_eq!(report.relabeled, vec!["a".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "c");
    assert_eq!(registry.camera_ids().unwrap(), vec!["a"]);
    assert_eq!(registry.camera_status("a").unwrap().name, "Lobby");
    assert_eq!(registry.camera_handle("a").unwrap().labels, a2.labels);

    // URI 变化: 重新注册
    let mut a3 = a2.clone();
    a3.uri = "fake://a2".to_string();
    store.set(vec![a3]);
    let report = registry.refresh(&store).unwrap();
    assert_eq!(report.restarted, vec!["a".to_string()]);
    assert_eq!(registry.camera_handle("a").unwrap().uri, "fake://a2");
}

#[test]
fn test_shutdown_all_stops_every_camera() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    connector.add("fake://a", true, true);
    connector.add("fake://b", true, true);
    let registry = registry(test_config(dir.path()), connector);

    for id in ["a", "b"] {
        registry
            .register(CameraHandle::new(id, &format!("fake://{}", id), fallen_labels()))
            .unwrap();
    }
    assert_eq!(registry.all_statuses().unwrap().len(), 2);

    registry.shutdown_all().unwrap();
    assert!(registry.all_statuses().unwrap().is_empty());
    assert!(registry.latest_frame("a").is_none());
}

#[cfg(not(feature = "rtsp"))]
#[test]
fn test_network_camera_needs_rtsp_build() {
    let dir = tempfile::tempdir().unwrap();
    let connector = std::sync::Arc::new(cctv_sentinel::SchemeConnector::with_default_stack());
    let (registry, _alerts) = CameraRegistry::builder(test_config(dir.path()), connector)
        .build()
        .unwrap();

    let err = registry
        .register(CameraHandle::new("gate", "rtsp://10.0.0.9:554/live", fallen_labels()))
        .unwrap_err();
    assert!(matches!(err, SentinelError::ConnectionFailed { ref camera_id, .. } if camera_id == "gate"));
    assert!(err.to_string().contains("rtsp"));
    assert!(registry.camera_ids().unwrap().is_empty());
}
