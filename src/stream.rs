// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 推流: 按摄像头帧率输出 JPEG 帧 (multipart/x-mixed-replace 分块)

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use tracing::{debug, warn};

use crate::camera::{CameraContext, PipelineServices};
use crate::input::encode_jpeg;

/// 没有任何帧时占位帧的尺寸
const DEFAULT_SIZE: (u32, u32) = (640, 480);
/// 帧率无效时按 25fps 推送
const DEFAULT_INTERVAL: Duration = Duration::from_millis(40);
const MAX_INTERVAL: Duration = Duration::from_secs(60);

/// 一个订阅者的帧流; 摄像头注销后结束
pub struct FrameStream {
    ctx: Arc<CameraContext>,
    services: Arc<PipelineServices>,
    last_size: (u32, u32),
    next_due: Option<Instant>,
}

impl FrameStream {
    pub(crate) fn new(ctx: Arc<CameraContext>, services: Arc<PipelineServices>) -> Self {
        ctx.subscribe();
        debug!(camera_id = %ctx.camera_id, "📺 新的推流订阅");
        Self {
            ctx,
            services,
            last_size: DEFAULT_SIZE,
            next_due: None,
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.ctx.camera_id
    }

    fn interval(&self) -> Duration {
        let fps = self.ctx.handle().fps;
        if fps.is_nan() || fps <= 0.0 {
            return DEFAULT_INTERVAL;
        }
        // 次正规数帧率会让 1/fps 溢出
        Duration::try_from_secs_f64(1.0 / fps)
            .ok()
            .filter(|d| *d <= MAX_INTERVAL)
            .unwrap_or(DEFAULT_INTERVAL)
    }

    /// 等到下一帧的发送时间
    fn pace(&mut self) {
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + self.interval());
    }

    /// 当前要推送的一帧: 标注帧 → 原始帧 → 占位帧
    pub fn next_jpeg(&mut self) -> Option<Vec<u8>> {
        let quality = self.services.config.stream_jpeg_quality;
        let encoded = match self.ctx.latest_display_frame(Instant::now()) {
            Some(frame) => {
                self.last_size = frame.dimensions();
                encode_jpeg(&frame.image, quality)
            }
            None => {
                let message = if self.ctx.connected() {
                    "No Signal"
                } else {
                    "Camera Disconnected"
                };
                let (w, h) = self.last_size;
                let image = self.services.annotator.placeholder(w, h, message, Local::now());
                encode_jpeg(&image, quality)
            }
        };
        match encoded {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(camera_id = %self.ctx.camera_id, "⚠️  推流编码失败: {}", e);
                None
            }
        }
    }
}

impl Iterator for FrameStream {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            self.pace();
            if !self.ctx.is_running() {
                return None;
            }
            if let Some(bytes) = self.next_jpeg() {
                return Some(bytes);
            }
        }
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        self.ctx.unsubscribe();
        debug!(camera_id = %self.ctx.camera_id, "📺 推流订阅结束");
    }
}

/// multipart/x-mixed-replace 的一个分块
pub fn multipart_part(jpeg: &[u8]) -> Vec<u8> {
    let header = format!(
        "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertEmitter;
    use crate::annotate::Annotator;
    use crate::config::SentinelConfig;
    use crate::detection::{CameraHandle, DetectionStage, LabelSet, PromptCache};
    use crate::input::{FrameSource, SourceConnector};
    use image::RgbImage;

    struct NoSource;

    impl SourceConnector for NoSource {
        fn open(&self, uri: &str) -> anyhow::Result<Box<dyn FrameSource>> {
            anyhow::bail!("unreachable {}", uri)
        }
    }

    fn setup(dir: &std::path::Path) -> (Arc<CameraContext>, Arc<PipelineServices>) {
        setup_with_fps(dir, 200.0)
    }

    fn setup_with_fps(dir: &std::path::Path, fps: f64) -> (Arc<CameraContext>, Arc<PipelineServices>) {
        let config = SentinelConfig::default();
        let (emitter, _rx) = AlertEmitter::new(dir, config.alert_cooldown(), 80, None).unwrap();
        let stage = DetectionStage::new(None, None, Arc::new(PromptCache::new()), config.detection_thresholds());
        let mut handle = CameraHandle::new("cam", "file:///nowhere", LabelSet::default());
        handle.fps = fps;
        let ctx = Arc::new(CameraContext::new(handle, &config));
        let services = Arc::new(PipelineServices {
            config,
            connector: Arc::new(NoSource),
            stage,
            emitter,
            annotator: Annotator::without_font(),
        });
        (ctx, services)
    }

    fn decode(bytes: &[u8]) -> image::DynamicImage {
        image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg).unwrap()
    }

    #[test]
    fn test_multipart_part_layout() {
        let part = multipart_part(b"abc");
        assert_eq!(
            part,
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 3\r\n\r\nabc\r\n".to_vec()
        );
    }

    #[test]
    fn test_stream_uses_latest_frame_size() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, services) = setup(dir.path());
        ctx.publish_first(RgbImage::new(32, 24));

        let mut stream = FrameStream::new(ctx.clone(), services);
        let jpeg = stream.next().unwrap();
        let img = decode(&jpeg);
        assert_eq!((img.width(), img.height()), (32, 24));
    }

    #[test]
    fn test_placeholder_when_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, services) = setup(dir.path());

        let mut stream = FrameStream::new(ctx.clone(), services);
        let img = decode(&stream.next().unwrap());
        assert_eq!((img.width(), img.height()), DEFAULT_SIZE);
    }

    #[test]
    fn test_subscriber_count_and_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, services) = setup(dir.path());

        let a = FrameStream::new(ctx.clone(), services.clone());
        let mut b = FrameStream::new(ctx.clone(), services);
        assert_eq!(ctx.status().subscribers, 2);
        drop(a);
        assert_eq!(ctx.status().subscribers, 1);

        ctx.stop();
        assert!(b.next().is_none());
        drop(b);
        assert_eq!(ctx.status().subscribers, 0);
    }

    #[test]
    fn test_degenerate_fps_falls_back_to_default_pace() {
        let dir = tempfile::tempdir().unwrap();
        for fps in [1e-310, 0.0, -5.0, f64::NAN, f64::INFINITY, 1e-12] {
            let (ctx, services) = setup_with_fps(dir.path(), fps);
            let mut stream = FrameStream::new(ctx, services);
            let expected = if fps == f64::INFINITY { Duration::ZERO } else { DEFAULT_INTERVAL };
            assert_eq!(stream.interval(), expected, "fps {}", fps);
            assert!(stream.next().is_some());
            assert!(stream.next().is_some());
        }
    }
}
