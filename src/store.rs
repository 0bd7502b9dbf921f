// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 摄像头与目标标签的配置来源 (持久化层接口)

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::detection::{CameraHandle, LabelSet, TargetLabel};

pub trait CameraStore: Send + Sync {
    fn list_cameras(&self) -> anyhow::Result<Vec<CameraHandle>>;

    fn target_labels(&self, camera_id: &str) -> anyhow::Result<Vec<TargetLabel>>;
}

/// 未配置目标标签时使用的默认标签 ("쓰러진 사람" 为告警)
pub fn default_labels() -> Vec<TargetLabel> {
    vec![
        TargetLabel::new("서 있는 사람", "a standing person", false),
        TargetLabel::new("쓰러진 사람", "a fallen person lying on the ground", true),
        TargetLabel::new("앉아 있는 사람", "a sitting person", false),
        TargetLabel::new("걷는 사람", "a walking person", false),
        TargetLabel::new("뛰는 사람", "a running person", false),
    ]
}

/// 文件中的一条摄像头记录
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraRecord {
    pub camera_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    pub uri: String,
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default)]
    pub labels: Vec<TargetLabel>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CameraFile {
    pub cameras: Vec<CameraRecord>,
}

/// JSON 文件摄像头列表; 每次查询都重新读取, 以便刷新时看到变更
pub struct JsonCameraStore {
    path: PathBuf,
}

impl JsonCameraStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> anyhow::Result<CameraFile> {
        let json = fs::read_to_string(&self.path)
            .with_context(|| format!("cannot read {}", self.path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("cannot parse {}", self.path.display()))
    }

    pub fn write(&self, file: &CameraFile) -> anyhow::Result<()> {
        fs::write(&self.path, serde_json::to_string_pretty(file)?)?;
        Ok(())
    }
}

fn labels_or_default(labels: &[TargetLabel]) -> Vec<TargetLabel> {
    if labels.is_empty() {
        default_labels()
    } else {
        labels.to_vec()
    }
}

impl CameraStore for JsonCameraStore {
    /// 标签集合非法的摄像头跳过并告警
    fn list_cameras(&self) -> anyhow::Result<Vec<CameraHandle>> {
        let file = self.read()?;
        let mut out = Vec::with_capacity(file.cameras.len());
        for rec in file.cameras {
            let labels = match LabelSet::new(labels_or_default(&rec.labels)) {
                Ok(l) => l,
                Err(e) => {
                    warn!(camera_id = %rec.camera_id, "⚠️  跳过摄像头: {}", e);
                    continue;
                }
            };
            let mut handle = CameraHandle::new(&rec.camera_id, &rec.uri, labels);
            if !rec.name.is_empty() {
                handle.name = rec.name;
            }
            handle.location = rec.location;
            if let Some(fps) = rec.fps.filter(|f| *f > 0.0) {
                handle.fps = fps;
            }
            out.push(handle);
        }
        Ok(out)
    }

    fn target_labels(&self, camera_id: &str) -> anyhow::Result<Vec<TargetLabel>> {
        let file = self.read()?;
        let rec = file
            .cameras
            .iter()
            .find(|c| c.camera_id == camera_id)
            .with_context(|| format!("unknown camera {}", camera_id))?;
        Ok(labels_or_default(&rec.labels))
    }
}
