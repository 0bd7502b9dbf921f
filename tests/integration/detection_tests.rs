// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! Detection, tracking and alerting through the registry.

use std::sync::Arc;
use std::time::Duration;

use cctv_sentinel::{CameraHandle, CameraRegistry, SentinelError, TargetLabel};

use super::support::*;

#[test]
fn test_alert_fires_once_per_cooldown() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    connector.add("fake://lobby", true, true);
    let classifier = FixedScores::new(&[0.9, 0.1]);

    let (registry, alerts) = CameraRegistry::builder(test_config(dir.path()), connector)
        .detector(Arc::new(FixedPerson))
        .classifier(classifier)
        .build()
        .unwrap();
    let mut handle = CameraHandle::new("lobby", "fake://lobby", fallen_labels());
    handle.location = "1F".to_string();
    registry.register(handle).unwrap();

    let event = alerts.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(event.camera_id, "lobby");
    assert_eq!(event.location, "1F");
    assert_eq!(event.label, "fallen");
    assert_eq!(event.track_id, 1);
    assert_eq!(event.count, 1);
    assert!(event.snapshot.exists());
    assert!(event.snapshot.starts_with(dir.path().join("shots")));
    assert!(event.snapshot.to_string_lossy().ends_with("_t1.jpg"));

    // 同一轨迹在冷却窗口内不再告警
    assert!(alerts.recv_timeout(Duration::from_millis(500)).is_err());

    let status = registry.camera_status("lobby").unwrap();
    assert_eq!(status.track_count, 1);
    assert!(status.detection_passes > 1);
    registry.shutdown_all().unwrap();
}

#[test]
fn test_non_alert_label_tracks_without_alerting() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    connector.add("fake://hall", true, true);

    let (registry, alerts) = CameraRegistry::builder(test_config(dir.path()), connector)
        .detector(Arc::new(FixedPerson))
        .classifier(FixedScores::new(&[0.9, 0.1]))
        .build()
        .unwrap();
    let labels = labels(&[("standing", "a standing person", false)]);
    registry
        .register(CameraHandle::new("hall", "fake://hall", labels))
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        registry.camera_status("hall").unwrap().track_count == 1
    }));
    assert!(alerts.recv_timeout(Duration::from_millis(300)).is_err());
}

#[test]
fn test_sink_prompt_suppresses_detection() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    connector.add("fake://gate", true, true);

    // 候选顺序: "a cat", "a dog", 兜底; 兜底 0.65 胜出
    let (registry, alerts) = CameraRegistry::builder(test_config(dir.path()), connector)
        .detector(Arc::new(FixedPerson))
        .classifier(FixedScores::new(&[0.3, 0.05, 0.65]))
        .build()
        .unwrap();
    let labels = labels(&[("cat", "a cat", true), ("dog", "a dog", false)]);
    registry
        .register(CameraHandle::new("gate", "fake://gate", labels))
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        registry.camera_status("gate").unwrap().detection_passes >= 5
    }));
    assert_eq!(registry.camera_status("gate").unwrap().track_count, 0);
    assert!(alerts.try_recv().is_err());
}

#[test]
fn test_update_config_swaps_labels_and_invalidates_prompts() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    connector.add("fake://dock", true, true);
    let classifier = FixedScores::new(&[0.9, 0.1]);

    let (registry, _alerts) = CameraRegistry::builder(test_config(dir.path()), connector)
        .detector(Arc::new(FixedPerson))
        .classifier(classifier.clone())
        .build()
        .unwrap();
    registry
        .register(CameraHandle::new("dock", "fake://dock", fallen_labels()))
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || classifier.encodes() == 1));

    let sitting = vec![TargetLabel::new("sitting", "a sitting person", false)];
    registry.update_config("dock", sitting).unwrap();
    assert_eq!(
        registry.camera_handle("dock").unwrap().labels.labels()[0].display_label,
        "sitting"
    );
    assert!(wait_until(Duration::from_secs(5), || classifier.encodes() >= 2));
    std::thread::sleep(Duration::from_millis(100));
    let settled = classifier.encodes();

    // 切回旧标签: 旧编码已失效, 需要重新编码
    let fallen = fallen_labels().labels().to_vec();
    registry.update_config("dock", fallen).unwrap();
    assert!(wait_until(Duration::from_secs(5), || classifier.encodes() > settled));
}

#[test]
fn test_update_config_rejects_invalid_labels() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    connector.add("fake://dock", true, true);
    let (registry, _alerts) = CameraRegistry::builder(test_config(dir.path()), connector)
        .build()
        .unwrap();
    registry
        .register(CameraHandle::new("dock", "fake://dock", fallen_labels()))
        .unwrap();

    let duplicate = vec![
        TargetLabel::new("a", "a person", false),
        TargetLabel::new("b", "a person", true),
    ];
    let err = registry.update_config("dock", duplicate).unwrap_err();
    assert!(matches!(err, SentinelError::InvalidLabelSet(_)));
    assert_eq!(registry.camera_handle("dock").unwrap().labels, fallen_labels());

    let err = registry
        .update_config("missing", fallen_labels().labels().to_vec())
        .unwrap_err();
    assert!(matches!(err, SentinelError::CameraNotFound(_)));
}

#[test]
fn test_missing_models_still_stream() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    connector.add("fake://yard", true, true);
    let (registry, _alerts) = CameraRegistry::builder(test_config(dir.path()), connector)
        .build()
        .unwrap();
    registry
        .register(CameraHandle::new("yard", "fake://yard", fallen_labels()))
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        registry.camera_status("yard").unwrap().frames_read > 5
    }));
    let status = registry.camera_status("yard").unwrap();
    assert_eq!(status.detection_passes, 0);
    assert_eq!(status.track_count, 0);
    assert!(registry.latest_jpeg("yard").unwrap().is_some());
}
