// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! Fake cameras, models and camera store shared by the integration tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use cctv_sentinel::detection::PromptEncoding;
use cctv_sentinel::{
    BBox, CameraHandle, CameraStore, DetectionPolicy, FrameSource, LabelSet, ObjectDetector,
    SemanticClassifier, SentinelConfig, SourceConnector, TargetLabel,
};
use image::{Rgb, RgbImage};
use ndarray::{Array1, Array2};
use parking_lot::Mutex;

pub const FRAME_W: u32 = 64;
pub const FRAME_H: u32 = 48;

/// Config tuned for fast tests: detection on every frame, short retry delays.
pub fn test_config(dir: &Path) -> SentinelConfig {
    SentinelConfig {
        snapshot_dir: dir.join("shots"),
        detection_policy: DetectionPolicy::Interval { secs: 0.0 },
        reader_failure_limit: 3,
        reader_retry_ms: 5,
        reconnect_delay_ms: 20,
        join_timeout_ms: 2000,
        registry_lock_timeout_ms: 500,
        ..Default::default()
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

pub fn labels(items: &[(&str, &str, bool)]) -> LabelSet {
    LabelSet::new(
        items
            .iter()
            .map(|(display, prompt, alert)| TargetLabel::new(display, prompt, *alert))
            .collect(),
    )
    .unwrap()
}

pub fn fallen_labels() -> LabelSet {
    labels(&[("fallen", "a person lying down", true)])
}

// ========== Cameras ==========

/// A simulated camera: `reachable` controls open, `delivering` controls reads.
#[derive(Debug)]
pub struct FakeCamera {
    pub reachable: AtomicBool,
    pub delivering: AtomicBool,
    pub opens: AtomicUsize,
}

impl FakeCamera {
    pub fn set_online(&self, online: bool) {
        self.reachable.store(online, Ordering::Release);
        self.delivering.store(online, Ordering::Release);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::Acquire)
    }
}

#[derive(Default)]
pub struct FakeConnector {
    cameras: Mutex<HashMap<String, Arc<FakeCamera>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, uri: &str, reachable: bool, delivering: bool) -> Arc<FakeCamera> {
        let cam = Arc::new(FakeCamera {
            reachable: AtomicBool::new(reachable),
            delivering: AtomicBool::new(delivering),
            opens: AtomicUsize::new(0),
        });
        self.cameras.lock().insert(uri.to_string(), cam.clone());
        cam
    }
}

impl SourceConnector for FakeConnector {
    fn open(&self, uri: &str) -> anyhow::Result<Box<dyn FrameSource>> {
        let cam = self
            .cameras
            .lock()
            .get(uri)
            .cloned()
            .with_context(|| format!("no route to {}", uri))?;
        cam.opens.fetch_add(1, Ordering::AcqRel);
        if !cam.reachable.load(Ordering::Acquire) {
            bail!("connection refused");
        }
        Ok(Box::new(FakeSource { cam }))
    }
}

struct FakeSource {
    cam: Arc<FakeCamera>,
}

impl FrameSource for FakeSource {
    fn read_frame(&mut self) -> anyhow::Result<RgbImage> {
        thread::sleep(Duration::from_millis(10));
        if !self.cam.delivering.load(Ordering::Acquire) {
            bail!("no frame");
        }
        Ok(RgbImage::from_pixel(FRAME_W, FRAME_H, Rgb([40, 40, 40])))
    }
}

// ========== Models ==========

/// Always reports one person at a fixed box.
pub struct FixedPerson;

impl ObjectDetector for FixedPerson {
    fn name(&self) -> &str {
        "fixed-person"
    }

    fn detect(&self, _image: &RgbImage) -> anyhow::Result<Vec<BBox>> {
        Ok(vec![BBox::new(20.0, 10.0, 44.0, 46.0).with_score(0.9, 0)])
    }
}

/// Returns fixed probabilities in candidate order (sorted prompts, sink last).
pub struct FixedScores {
    probs: Vec<f32>,
    pub encodes: AtomicUsize,
}

impl FixedScores {
    pub fn new(probs: &[f32]) -> Arc<Self> {
        Arc::new(Self {
            probs: probs.to_vec(),
            encodes: AtomicUsize::new(0),
        })
    }

    pub fn encodes(&self) -> usize {
        self.encodes.load(Ordering::Acquire)
    }
}

impl SemanticClassifier for FixedScores {
    fn name(&self) -> &str {
        "fixed-scores"
    }

    fn encode_prompts(&self, prompts: &[String]) -> anyhow::Result<Array2<f32>> {
        self.encodes.fetch_add(1, Ordering::AcqRel);
        Ok(Array2::zeros((prompts.len(), 4)))
    }

    fn score(&self, _crop: &RgbImage, prompts: &PromptEncoding) -> anyhow::Result<Array1<f32>> {
        // 概率取对数后作为 logits, softmax 还原为同样的概率
        Ok(Array1::from_shape_fn(prompts.len(), |i| {
            self.probs.get(i).copied().unwrap_or(1e-6).ln()
        }))
    }
}

// ========== Camera store ==========

#[derive(Default)]
pub struct MemoryStore {
    cameras: Mutex<Vec<CameraHandle>>,
}

impl MemoryStore {
    pub fn set(&self, cameras: Vec<CameraHandle>) {
        *self.cameras.lock() = cameras;
    }
}

impl CameraStore for MemoryStore {
    fn list_cameras(&self) -> anyhow::Result<Vec<CameraHandle>> {
        Ok(self.cameras.lock().clone())
    }

    fn target_labels(&self, camera_id: &str) -> anyhow::Result<Vec<TargetLabel>> {
        self.cameras
            .lock()
            .iter()
            .find(|c| c.camera_id == camera_id)
            .map(|c| c.labels.labels().to_vec())
            .with_context(|| format!("unknown camera {}", camera_id))
    }
}
