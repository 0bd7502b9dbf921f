// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 帧、有界帧槽、最新帧缓存、FPS统计

use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use parking_lot::Mutex;

/// 一帧图像 (采集后不再修改, 标注时复制)
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: Arc<RgbImage>, // 使用Arc共享数据,避免复制
    pub captured_at: Instant,
    pub wall_time: DateTime<Local>,
    pub seq: u64,
}

impl Frame {
    pub fn new(image: RgbImage, seq: u64) -> Self {
        Self {
            image: Arc::new(image),
            captured_at: Instant::now(),
            wall_time: Local::now(),
            seq,
        }
    }

    pub fn with_time(image: RgbImage, seq: u64, captured_at: Instant) -> Self {
        Self {
            captured_at,
            ..Self::new(image, seq)
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.captured_at)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn to_jpeg(&self, quality: u8) -> crate::Result<Vec<u8>> {
        encode_jpeg(&self.image, quality)
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> crate::Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    image.write_with_encoder(encoder)?;
    Ok(buf.into_inner())
}

// ========== 有界帧槽 ==========

/// 采集线程 → 检测线程 的有界帧槽, 满时丢弃最旧帧 (latest wins)
pub struct FrameSlot {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    dropped: AtomicU64,
}

impl FrameSlot {
    /// 容量限制在 1..=2
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.clamp(1, 2));
        Self {
            tx,
            rx,
            dropped: AtomicU64::new(0),
        }
    }

    /// 写入新帧; 返回被挤掉的旧帧数
    pub fn push(&self, frame: Frame) -> u32 {
        let mut evicted = 0;
        let mut frame = frame;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(f)) => {
                    if self.rx.try_recv().is_ok() {
                        evicted += 1;
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    frame = f;
                }
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }

    /// 等待下一帧, 超时返回 None
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Frame> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// 清空帧槽, 返回丢弃数量
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(1)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ========== 最新帧缓存 ==========

/// 单槽最新帧缓存: 一个写者, 多个读者; 读取时拷贝出锁
pub struct FrameCache {
    slot: Mutex<Option<Frame>>,
    freshness: Duration,
}

impl FrameCache {
    pub fn new(freshness: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            freshness,
        }
    }

    pub fn put(&self, frame: Frame) {
        *self.slot.lock() = Some(frame);
    }

    /// 超过新鲜度窗口的帧视为不存在
    pub fn latest(&self, now: Instant) -> Option<Frame> {
        let frame = self.slot.lock().clone()?;
        if frame.age(now) > self.freshness {
            None
        } else {
            Some(frame)
        }
    }

    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}

// ========== FPS统计 ==========

/// 每秒滚动一次的FPS统计
#[derive(Debug)]
pub struct FpsCounter {
    count: u32,
    last: Instant,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            count: 0,
            last: now,
        }
    }

    /// 记录一帧; 窗口满1秒时返回新的FPS
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        if elapsed >= 1.0 {
            let fps = self.count as f64 / elapsed;
            self.count = 0;
            self.last = now;
            Some(fps)
        } else {
            None
        }
    }
}
