// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 视频输入系统 (Video Input System)
///
/// 每路摄像头一个采集线程
/// - FrameSource/SourceConnector: 采集库黑盒接口
/// - Reader:    读流循环, 写入最新帧缓存与有界帧槽
/// - Reconnect: 重连额度与冷却窗口
/// - ImageDir:  图片目录回放源
/// - Rtsp:      FFmpeg 拉流源 (`rtsp` 特性)
/// - Scheme:    按 URI 协议选择源
pub mod frame;
pub mod image_dir;
pub mod reader;
pub mod reconnect;
#[cfg(feature = "rtsp")]
pub mod rtsp;
pub mod scheme;
pub mod source;

pub use frame::{encode_jpeg, FpsCounter, Frame, FrameCache, FrameSlot};
pub use image_dir::ImageDirConnector;
pub use reader::{run_reader, ReaderParams, ReaderSink, StreamStats};
pub use reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectState};
#[cfg(feature = "rtsp")]
pub use rtsp::RtspConnector;
pub use scheme::{is_network_uri, SchemeConnector};
pub use source::{probe, FrameSource, SourceConnector};
