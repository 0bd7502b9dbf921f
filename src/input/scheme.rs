// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 按 URI 协议选择视频源
//!
//! `rtsp://` `rtsps://` `rtmp://` `http(s)://` 走网络拉流; `file://` 与裸路径走图片目录回放。

use std::sync::Arc;

use anyhow::bail;

use super::image_dir::ImageDirConnector;
use super::source::{FrameSource, SourceConnector};

const NETWORK_SCHEMES: [&str; 5] = ["rtsp", "rtsps", "rtmp", "http", "https"];

/// URI 是否指向网络流
pub fn is_network_uri(uri: &str) -> bool {
    uri.split_once("://")
        .map(|(scheme, _)| NETWORK_SCHEMES.contains(&scheme.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub struct SchemeConnector {
    files: Arc<dyn SourceConnector>,
    network: Option<Arc<dyn SourceConnector>>,
}

impl SchemeConnector {
    pub fn new(files: Arc<dyn SourceConnector>, network: Option<Arc<dyn SourceConnector>>) -> Self {
        Self { files, network }
    }

    /// 图片目录回放 + (启用 `rtsp` 特性时) FFmpeg 拉流
    pub fn with_default_stack() -> Self {
        #[cfg(feature = "rtsp")]
        let network: Option<Arc<dyn SourceConnector>> =
            Some(Arc::new(super::rtsp::RtspConnector::default()));
        #[cfg(not(feature = "rtsp"))]
        let network: Option<Arc<dyn SourceConnector>> = None;
        Self::new(Arc::new(ImageDirConnector::default()), network)
    }

    pub fn supports_network(&self) -> bool {
        self.network.is_some()
    }
}

impl SourceConnector for SchemeConnector {
    fn open(&self, uri: &str) -> anyhow::Result<Box<dyn FrameSource>> {
        if !is_network_uri(uri) {
            return self.files.open(uri);
        }
        match &self.network {
            Some(network) => network.open(uri),
            None => bail!("network stream '{}' needs a build with the `rtsp` feature", uri),
        }
    }
}
