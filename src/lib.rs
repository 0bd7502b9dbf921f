// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 多路摄像头哨兵 (CCTV Sentinel)
//!
//! 采集 → 检测 → 跟踪 → 告警 流水线:
//! 每路摄像头一个采集线程 + 一个检测/跟踪线程, 摄像头注册表负责生命周期。

pub mod alert; // 告警发射器 + 截图存档
pub mod annotate; // 画框与占位帧
pub mod camera; // 单路摄像头上下文与工作线程
pub mod config; // 阈值与运行参数
pub mod detection; // 检测/分类/跟踪/标签稳定
pub mod error; // 错误类型
pub mod input; // 视频输入系统
pub mod registry; // 摄像头注册表
pub mod store; // 摄像头与目标标签的配置来源
pub mod stream; // 推流 (JPEG 分块)

pub use crate::alert::{AlertEmitter, AlertEvent};
pub use crate::camera::{CameraState, CameraStatus};
pub use crate::config::{Args, DetectionPolicy, SentinelConfig};
pub use crate::detection::{
    BBox, CameraHandle, Detection, LabelSet, ObjectDetector, SemanticClassifier, TargetLabel,
};
pub use crate::error::{Result, SentinelError};
pub use crate::input::{Frame, FrameSource, ImageDirConnector, SchemeConnector, SourceConnector};
pub use crate::registry::{CameraRegistry, RefreshReport};
pub use crate::store::{CameraStore, JsonCameraStore};
pub use crate::stream::{multipart_part, FrameStream};

use tracing_subscriber::{fmt, EnvFilter};

/// 初始化日志
///
/// `RUST_LOG` 控制过滤级别 (默认 info), `LOG_FORMAT=json` 输出结构化 JSON。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(false)
            .init();
    } else {
        fmt().with_env_filter(filter).with_target(true).init();
    }
}
