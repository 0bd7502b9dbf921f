// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 错误类型
//!
//! 帧槽满 (drop-oldest) 与过期帧 (返回 `None`) 不属于错误, 不在此枚举中。

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("camera already registered: {0}")]
    DuplicateCamera(String),

    /// 源不可达或首帧探测失败, 注册表状态不变
    #[error("connection failed for camera {camera_id}: {reason}")]
    ConnectionFailed { camera_id: String, reason: String },

    /// 运行中连续读帧失败, 交给重连管理器处理
    #[error("stream interrupted for camera {camera_id} after {failures} consecutive read failures")]
    StreamInterrupted { camera_id: String, failures: u32 },

    #[error("detection unavailable: {0}")]
    DetectionUnavailable(String),

    #[error("camera not found: {0}")]
    CameraNotFound(String),

    #[error("invalid label set: {0}")]
    InvalidLabelSet(String),

    #[error("registry lock not acquired within {0:?}")]
    RegistryBusy(Duration),

    /// 配置来源 (持久化层) 出错
    #[error(transparent)]
    Store(#[from] anyhow::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SentinelError>;

impl SentinelError {
    pub fn connection_failed(camera_id: &str, reason: impl std::fmt::Display) -> Self {
        Self::ConnectionFailed {
            camera_id: camera_id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_labels(reason: impl Into<String>) -> Self {
        Self::InvalidLabelSet(reason.into())
    }

    /// 是否为调用方的配置错误 (同步返回给调用者, 不做重试)
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateCamera(_) | Self::InvalidLabelSet(_) | Self::CameraNotFound(_)
        )
    }
}
