// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 视频源接口 (采集库黑盒)

use image::RgbImage;

/// 已打开的视频源; 由采集线程独占
pub trait FrameSource: Send {
    /// 阻塞读取下一帧
    fn read_frame(&mut self) -> anyhow::Result<RgbImage>;
}

/// 按 URI 打开视频源; 注册表与重连管理器共享
pub trait SourceConnector: Send + Sync {
    fn open(&self, uri: &str) -> anyhow::Result<Box<dyn FrameSource>>;
}

/// 打开并读取首帧 (连接探测)
pub fn probe(
    connector: &dyn SourceConnector,
    uri: &str,
) -> anyhow::Result<(Box<dyn FrameSource>, RgbImage)> {
    let mut source = connector.open(uri)?;
    let first = source.read_frame()?;
    Ok((source, first))
}
