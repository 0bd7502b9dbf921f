// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测阶段 (Detection Stage)
//! 职责: 粗检测 → 类别/置信度过滤 → 外扩裁剪 → 语义分类 → Detection

use std::sync::Arc;

use image::{imageops, RgbImage};
use tracing::{debug, warn};

use super::classifier::{softmax, PromptCache, SemanticClassifier};
use super::types::{BBox, Detection, LabelSet};
use crate::error::{Result, SentinelError};
use crate::input::Frame;

/// 粗检测器 Trait (外部模型)
///
/// 返回像素坐标检测框, 包含置信度与类别ID; 在多个摄像头线程间共享。
pub trait ObjectDetector: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, image: &RgbImage) -> anyhow::Result<Vec<BBox>>;
}

/// 检测阶段阈值
#[derive(Clone, Copy, Debug)]
pub struct DetectionThresholds {
    pub target_class_id: u32,
    pub detector_confidence: f32,
    pub classifier_threshold: f32,
    pub box_margin: f32,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            target_class_id: 0,
            detector_confidence: 0.5,
            classifier_threshold: 0.6,
            box_margin: 0.15,
        }
    }
}

pub struct DetectionStage {
    detector: Option<Arc<dyn ObjectDetector>>,
    classifier: Option<Arc<dyn SemanticClassifier>>,
    prompts: Arc<PromptCache>,
    thresholds: DetectionThresholds,
}

impl DetectionStage {
    pub fn new(
        detector: Option<Arc<dyn ObjectDetector>>,
        classifier: Option<Arc<dyn SemanticClassifier>>,
        prompts: Arc<PromptCache>,
        thresholds: DetectionThresholds,
    ) -> Self {
        Self {
            detector,
            classifier,
            prompts,
            thresholds,
        }
    }

    pub fn is_available(&self) -> bool {
        self.detector.is_some() && self.classifier.is_some()
    }

    /// 对一帧运行检测
    ///
    /// 外部模型未加载时返回 `DetectionUnavailable`; 推理出错只跳过本次检测。
    pub fn run(&self, camera_id: &str, frame: &Frame, labels: &LabelSet) -> Result<Vec<Detection>> {
        let (detector, classifier) = match (&self.detector, &self.classifier) {
            (Some(d), Some(c)) => (d, c),
            (None, _) => {
                return Err(SentinelError::DetectionUnavailable(
                    "object detector not loaded".into(),
                ))
            }
            (_, None) => {
                return Err(SentinelError::DetectionUnavailable(
                    "semantic classifier not loaded".into(),
                ))
            }
        };

        // 只有兜底提示词时必然被丢弃
        if labels.is_empty() {
            return Ok(Vec::new());
        }

        let image = frame.image.as_ref();
        let (frame_w, frame_h) = image.dimensions();

        let boxes = match detector.detect(image) {
            Ok(boxes) => boxes,
            Err(e) => {
                warn!(camera_id, "⚠️  检测失败 ({}): {:#}", detector.name(), e);
                return Ok(Vec::new());
            }
        };

        let candidates: Vec<BBox> = boxes
            .into_iter()
            .filter(|b| {
                b.class_id == self.thresholds.target_class_id
                    && b.confidence >= self.thresholds.detector_confidence
            })
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let encoding = match self.prompts.get_or_encode(labels, classifier.as_ref()) {
            Ok(enc) => enc,
            Err(e) => {
                warn!(camera_id, "⚠️  提示词编码失败 ({}): {:#}", classifier.name(), e);
                return Ok(Vec::new());
            }
        };

        let mut detections = Vec::with_capacity(candidates.len());
        for bbox in candidates {
            let expanded = bbox.expand(self.thresholds.box_margin, frame_w, frame_h);
            let Some((x, y, w, h)) = expanded.crop_rect(frame_w, frame_h) else {
                continue;
            };
            let crop = imageops::crop_imm(image, x, y, w, h).to_image();

            let logits = match classifier.score(&crop, &encoding) {
                Ok(l) if l.len() == encoding.len() => l,
                Ok(l) => {
                    warn!(
                        camera_id,
                        "⚠️  分类器返回 {} 个分数, 期望 {}",
                        l.len(),
                        encoding.len()
                    );
                    continue;
                }
                Err(e) => {
                    warn!(camera_id, "⚠️  分类失败 ({}): {:#}", classifier.name(), e);
                    continue;
                }
            };

            let probs = softmax(logits.view());
            let (best, best_p) = argmax(probs.as_slice().unwrap_or(&[]));
            if best == encoding.sink_index() || best_p < self.thresholds.classifier_threshold {
                debug!(camera_id, "丢弃候选框: best={} p={:.2}", encoding.prompts[best], best_p);
                continue;
            }
            let Some(label) = labels.display_for_prompt(&encoding.prompts[best]) else {
                continue;
            };

            detections.push(Detection {
                camera_id: camera_id.to_string(),
                bbox,
                detector_confidence: bbox.confidence,
                label: label.to_string(),
                label_confidence: best_p,
                captured_at: frame.wall_time,
            });
        }
        Ok(detections)
    }
}

/// 最大值下标, 并列取靠前者
fn argmax(values: &[f32]) -> (usize, f32) {
    let mut best = (0, f32::NEG_INFINITY);
    for (i, &v) in values.iter().enumerate() {
        if v > best.1 {
            best = (i, v);
        }
    }
    best
}
