// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 检测系统数据结构定义
/// Data structures shared by the detection, tracking and alert stages
use std::collections::HashSet;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::detection::classifier::SINK_PROMPT;
use crate::error::{Result, SentinelError};

// ========== 检测框 ==========

/// 检测框 (像素坐标, x1 < x2, y1 < y2)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: u32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence: 1.0,
            class_id: 0,
        }
    }

    /// 由中心点与宽高构造
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn with_score(mut self, confidence: f32, class_id: u32) -> Self {
        self.confidence = confidence;
        self.class_id = class_id;
        self
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// 四边各外扩 `margin` 倍宽/高, 并裁剪到画面内
    pub fn expand(&self, margin: f32, frame_w: u32, frame_h: u32) -> BBox {
        let dx = self.width() * margin;
        let dy = self.height() * margin;
        BBox {
            x1: (self.x1 - dx).max(0.0),
            y1: (self.y1 - dy).max(0.0),
            x2: (self.x2 + dx).min(frame_w as f32),
            y2: (self.y2 + dy).min(frame_h as f32),
            ..*self
        }
    }

    /// 转为整数裁剪区域 (x, y, w, h), 空区域返回 None
    pub fn crop_rect(&self, frame_w: u32, frame_h: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x1.max(0.0).round() as u32;
        let y1 = self.y1.max(0.0).round() as u32;
        let x2 = (self.x2.max(0.0).round() as u32).min(frame_w);
        let y2 = (self.y2.max(0.0).round() as u32).min(frame_h);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

// ========== 检测结果 ==========

/// 一次检测通过后的语义检测结果 (不可变)
#[derive(Clone, Debug)]
pub struct Detection {
    pub camera_id: String,
    pub bbox: BBox,
    pub detector_confidence: f32,
    /// 显示标签 (已由提示词映射回来)
    pub label: String,
    pub label_confidence: f32,
    pub captured_at: DateTime<Local>,
}

// ========== 目标标签 ==========

/// 目标标签: 显示名 → 分类提示词 + 是否告警
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetLabel {
    pub display_label: String,
    pub prompt: String,
    #[serde(default)]
    pub is_alert: bool,
}

impl TargetLabel {
    pub fn new(display_label: &str, prompt: &str, is_alert: bool) -> Self {
        Self {
            display_label: display_label.to_string(),
            prompt: prompt.to_string(),
            is_alert,
        }
    }
}

/// 一路摄像头的标签集合 (按值查询是否告警)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TargetLabel>", into = "Vec<TargetLabel>")]
pub struct LabelSet {
    labels: Vec<TargetLabel>,
}

impl LabelSet {
    /// 校验并构造: 提示词非空且不重复, 显示名不重复, 不能占用兜底提示词
    pub fn new(labels: Vec<TargetLabel>) -> Result<Self> {
        let mut prompts = HashSet::new();
        let mut names = HashSet::new();
        for label in &labels {
            let prompt = label.prompt.trim();
            if prompt.is_empty() || label.display_label.trim().is_empty() {
                return Err(SentinelError::invalid_labels(format!(
                    "empty label or prompt in {:?}",
                    label
                )));
            }
            if prompt.eq_ignore_ascii_case(SINK_PROMPT) {
                return Err(SentinelError::invalid_labels(format!(
                    "prompt '{}' is reserved",
                    SINK_PROMPT
                )));
            }
            if !prompts.insert(prompt.to_string()) {
                return Err(SentinelError::invalid_labels(format!(
                    "duplicate prompt '{}'",
                    prompt
                )));
            }
            if !names.insert(label.display_label.as_str()) {
                return Err(SentinelError::invalid_labels(format!(
                    "duplicate display label '{}'",
                    label.display_label
                )));
            }
        }
        Ok(Self { labels })
    }

    pub fn labels(&self) -> &[TargetLabel] {
        &self.labels
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// 排序后的提示词 (不含兜底)
    pub fn sorted_prompts(&self) -> Vec<String> {
        let mut prompts: Vec<String> = self.labels.iter().map(|l| l.prompt.trim().to_string()).collect();
        prompts.sort();
        prompts
    }

    /// 缓存键: 排序后的提示词集合
    pub fn cache_key(&self) -> String {
        self.sorted_prompts().join("\u{1f}")
    }

    pub fn display_for_prompt(&self, prompt: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.prompt.trim() == prompt)
            .map(|l| l.display_label.as_str())
    }

    pub fn is_alert(&self, display_label: &str) -> bool {
        self.labels
            .iter()
            .any(|l| l.is_alert && l.display_label == display_label)
    }

    pub fn contains(&self, display_label: &str) -> bool {
        self.labels.iter().any(|l| l.display_label == display_label)
    }
}

impl TryFrom<Vec<TargetLabel>> for LabelSet {
    type Error = SentinelError;

    fn try_from(labels: Vec<TargetLabel>) -> Result<Self> {
        LabelSet::new(labels)
    }
}

impl From<LabelSet> for Vec<TargetLabel> {
    fn from(set: LabelSet) -> Self {
        set.labels
    }
}

// ========== 摄像头 ==========

/// 摄像头句柄 (注册表独占)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraHandle {
    pub camera_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    pub uri: String,
    /// 推流目标帧率
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default)]
    pub labels: LabelSet,
}

fn default_fps() -> f64 {
    25.0
}

impl CameraHandle {
    pub fn new(camera_id: &str, uri: &str, labels: LabelSet) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            name: camera_id.to_string(),
            location: String::new(),
            uri: uri.to_string(),
            fps: default_fps(),
            labels,
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.camera_id
        } else {
            &self.name
        }
    }
}
