// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! RTSP 拉流源 (ez-ffmpeg 软解)
//!
//! 每个源一个解码线程: FFmpeg 管线输出 RGB24 帧, 经容量为 1 的通道交给采集线程。
//! 采集线程读得慢时丢弃旧帧, 只保留最新一帧。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame, Input};
use image::RgbImage;
use tracing::{debug, info};

use super::source::{FrameSource, SourceConnector};

/// 单边最大分辨率
const MAX_SIDE: u32 = 8192;

pub struct RtspConnector {
    /// 等待管线启动的时间
    open_timeout: Duration,
    /// 单帧读取超时, 超时视为读失败
    read_timeout: Duration,
}

impl RtspConnector {
    pub fn new(open_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            open_timeout,
            read_timeout,
        }
    }
}

impl Default for RtspConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(5))
    }
}

impl SourceConnector for RtspConnector {
    fn open(&self, uri: &str) -> anyhow::Result<Box<dyn FrameSource>> {
        let (frame_tx, frame_rx) = bounded(1);
        let (ready_tx, ready_rx) = bounded(1);
        let stop = Arc::new(AtomicBool::new(false));

        let filter = RgbFilter {
            tx: frame_tx,
            drain: frame_rx.clone(),
            stop: stop.clone(),
            frames: 0,
        };
        let url = uri.to_string();
        thread::Builder::new()
            .name("rtsp-decode".to_string())
            .spawn(move || decode(&url, filter, ready_tx))
            .context("spawn rtsp decode thread")?;

        match ready_rx.recv_timeout(self.open_timeout) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => bail!("{}", e),
            Err(_) => {
                stop.store(true, Ordering::Relaxed);
                bail!("rtsp open timed out after {:?}", self.open_timeout);
            }
        }
        info!("✅ RTSP 已连接: {}", uri);
        Ok(Box::new(RtspSource {
            rx: frame_rx,
            stop,
            read_timeout: self.read_timeout,
        }))
    }
}

/// 解码线程主体; 启动结果通过 `ready` 回报
fn decode(url: &str, filter: RgbFilter, ready: Sender<Result<(), String>>) {
    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("rgb", Box::new(filter));
    let out = create_null_output().add_frame_pipeline(pipe);

    let input = Input::new(url).set_input_opts(
        [
            ("rtsp_transport", "tcp"),
            ("rtsp_flags", "prefer_tcp"),
            ("buffer_size", "67108864"),
            // 微秒
            ("timeout", "5000000"),
        ]
        .into(),
    );

    let ctx = match FfmpegContext::builder()
        .input(input)
        .filter_desc("format=rgb24")
        .output(out)
        .build()
    {
        Ok(ctx) => ctx,
        Err(e) => {
            let _ = ready.send(Err(format!("构建失败: {}", e)));
            return;
        }
    };
    let sch = match ctx.start() {
        Ok(sch) => sch,
        Err(e) => {
            let _ = ready.send(Err(format!("启动失败: {}", e)));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    if let Err(e) = sch.wait() {
        debug!("RTSP 解码结束: {}", e);
    }
    debug!("❌ RTSP 解码线程退出: {}", url);
}

// ========== 帧过滤器 ==========

/// FFmpeg 帧 → RgbImage, 只保留最新一帧
struct RgbFilter {
    tx: Sender<RgbImage>,
    drain: Receiver<RgbImage>,
    stop: Arc<AtomicBool>,
    frames: u64,
}

impl FrameFilter for RgbFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        if self.stop.load(Ordering::Relaxed) {
            return Err("source closed".to_string());
        }
        if frame.is_empty() || frame.is_corrupt() {
            return Ok(None);
        }

        // format=rgb24: 单平面打包像素
        let image = unsafe {
            let raw = frame.as_ptr();
            if raw.is_null() {
                return Ok(None);
            }
            let w = (*raw).width;
            let h = (*raw).height;
            let stride = (*raw).linesize[0];
            let data = (*raw).data[0];
            if w <= 0 || h <= 0 || stride <= 0 || data.is_null() {
                return Ok(None);
            }
            let len = stride as usize * h as usize;
            let packed = std::slice::from_raw_parts(data, len);
            rgb_from_packed(packed, w as u32, h as u32, stride as usize)
        };
        let Some(image) = image else {
            return Ok(None);
        };

        self.frames += 1;
        if self.frames == 1 {
            debug!("📺 首帧 {}x{}", image.width(), image.height());
        }
        // 通道满: 丢弃旧帧再放入
        if let Err(TrySendError::Full(image)) = self.tx.try_send(image) {
            let _ = self.drain.try_recv();
            let _ = self.tx.try_send(image);
        }
        Ok(Some(frame))
    }
}

/// 按行跨度拷贝打包的 RGB24 数据; 尺寸不合法时返回 None
fn rgb_from_packed(data: &[u8], width: u32, height: u32, stride: usize) -> Option<RgbImage> {
    if width == 0 || height == 0 || width > MAX_SIDE || height > MAX_SIDE {
        return None;
    }
    let row = width as usize * 3;
    if stride < row || data.len() < stride * (height as usize - 1) + row {
        return None;
    }
    let mut buf = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        buf.extend_from_slice(&data[y * stride..y * stride + row]);
    }
    RgbImage::from_raw(width, height, buf)
}

// ========== 源 ==========

struct RtspSource {
    rx: Receiver<RgbImage>,
    stop: Arc<AtomicBool>,
    read_timeout: Duration,
}

impl FrameSource for RtspSource {
    fn read_frame(&mut self) -> anyhow::Result<RgbImage> {
        match self.rx.recv_timeout(self.read_timeout) {
            Ok(image) => Ok(image),
            Err(RecvTimeoutError::Timeout) => Err(anyhow!("no frame within {:?}", self.read_timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!("rtsp stream ended")),
        }
    }
}

impl Drop for RtspSource {
    fn drop(&mut self) {
        // 解码线程在下一帧时退出
        self.stop.store(true, Ordering::Relaxed);
    }
}
