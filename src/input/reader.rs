// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 读流循环 (Stream Reader)
//! 职责: 源 → 最新帧缓存 + 有界帧槽, 连续失败后判定断线

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::frame::{FpsCounter, Frame, FrameCache, FrameSlot};
use super::source::FrameSource;
use crate::error::{Result, SentinelError};

/// 读流统计 (读流线程写, 状态查询读)
#[derive(Debug, Default)]
pub struct StreamStats {
    connected: AtomicBool,
    frames_read: AtomicU64,
    fps_bits: AtomicU64,
    seq: AtomicU64,
}

impl StreamStats {
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
        if !connected {
            self.set_fps(0.0);
        }
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::Relaxed)
    }

    pub fn fps(&self) -> f64 {
        f64::from_bits(self.fps_bits.load(Ordering::Relaxed))
    }

    fn set_fps(&self, fps: f64) {
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    /// 下一帧序号
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// 记录一帧成功读取
    pub fn record_frame(&self) {
        self.frames_read.fetch_add(1, Ordering::Relaxed);
    }
}

/// 读流循环的共享输出
pub struct ReaderSink<'a> {
    pub camera_id: &'a str,
    pub running: &'a AtomicBool,
    pub slot: &'a FrameSlot,
    pub cache: &'a FrameCache,
    pub stats: &'a StreamStats,
}

impl ReaderSink<'_> {
    /// 发布一帧: 先更新缓存, 再写入帧槽
    pub fn publish(&self, frame: Frame) {
        self.cache.put(frame.clone());
        self.slot.push(frame);
        self.stats.record_frame();
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ReaderParams {
    /// 连续失败达到此值判定断线
    pub failure_limit: u32,
    /// 失败后重试间隔
    pub retry: Duration,
}

impl Default for ReaderParams {
    fn default() -> Self {
        Self {
            failure_limit: 10,
            retry: Duration::from_millis(100),
        }
    }
}

/// 运行读流循环直到停止或断线
///
/// 正常停止返回 `Ok(())`; 连续失败达到上限返回 `StreamInterrupted`。
pub fn run_reader(source: &mut dyn FrameSource, sink: &ReaderSink<'_>, params: ReaderParams) -> Result<()> {
    let mut failures = 0u32;
    let mut fps = FpsCounter::new(Instant::now());
    sink.stats.set_connected(true);

    while sink.running.load(Ordering::Acquire) {
        match source.read_frame() {
            Ok(image) => {
                failures = 0;
                let frame = Frame::new(image, sink.stats.next_seq());
                let now = frame.captured_at;
                sink.publish(frame);
                if let Some(v) = fps.tick(now) {
                    sink.stats.set_fps(v);
                }
            }
            Err(e) => {
                failures += 1;
                debug!(camera_id = sink.camera_id, failures, "读帧失败: {:#}", e);
                if failures >= params.failure_limit {
                    sink.stats.set_connected(false);
                    warn!(camera_id = sink.camera_id, "📴 连续{}次读帧失败, 判定断线", failures);
                    return Err(SentinelError::StreamInterrupted {
                        camera_id: sink.camera_id.to_string(),
                        failures,
                    });
                }
                thread::sleep(params.retry);
            }
        }
    }
    Ok(())
}
