// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! Per-subscriber JPEG streams.

use std::time::Duration;

use cctv_sentinel::{multipart_part, CameraHandle, CameraRegistry, SentinelConfig, SentinelError};

use super::support::*;

fn decode(jpeg: &[u8]) -> image::DynamicImage {
    image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg).unwrap()
}

#[test]
fn test_stream_delivers_frames_and_counts_subscribers() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    connector.add("fake://a", true, true);
    let (registry, _alerts) = CameraRegistry::builder(test_config(dir.path()), connector)
        .build()
        .unwrap();
    let mut handle = CameraHandle::new("a", "fake://a", fallen_labels());
    handle.fps = 50.0;
    registry.register(handle).unwrap();

    let mut first = registry.stream_frames("a").unwrap();
    let second = registry.stream_frames("a").unwrap();
    assert_eq!(registry.camera_status("a").unwrap().subscribers, 2);

    let jpeg = first.next().unwrap();
    let img = decode(&jpeg);
    assert_eq!((img.width(), img.height()), (FRAME_W, FRAME_H));

    let part = multipart_part(&jpeg);
    assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n"));
    assert!(part.ends_with(b"\r\n"));

    drop(second);
    assert_eq!(registry.camera_status("a").unwrap().subscribers, 1);

    // 注销后流结束
    registry.unregister("a").unwrap();
    assert!(first.next().is_none());
}

#[test]
fn test_stream_placeholder_keeps_last_size_when_disconnected() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    let cam = connector.add("fake://a", true, true);
    let config = SentinelConfig {
        freshness_secs: 0.2,
        ..test_config(dir.path())
    };
    let (registry, _alerts) = CameraRegistry::builder(config, connector).build().unwrap();
    let mut handle = CameraHandle::new("a", "fake://a", fallen_labels());
    handle.fps = 50.0;
    registry.register(handle).unwrap();

    let mut stream = registry.stream_frames("a").unwrap();
    assert!(stream.next().is_some());

    cam.set_online(false);
    assert!(wait_until(Duration::from_secs(5), || {
        !registry.camera_status("a").unwrap().connected && registry.latest_frame("a").is_none()
    }));
    let img = decode(&stream.next().unwrap());
    assert_eq!((img.width(), img.height()), (FRAME_W, FRAME_H));
}

#[test]
fn test_stream_unknown_camera() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, _alerts) = CameraRegistry::builder(test_config(dir.path()), FakeConnector::new())
        .build()
        .unwrap();
    assert!(matches!(
        registry.stream_frames("nope"),
        Err(SentinelError::CameraNotFound(_))
    ));
}
