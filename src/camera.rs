// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 单路摄像头上下文与工作线程
//!
//! 每路摄像头两个线程:
//! 1. 采集线程: 读流 → 最新帧缓存 + 有界帧槽, 断线后由重连管理器重新探测
//! 2. 检测线程: 帧槽 → 调度 → 检测/分类 → 跟踪 → 告警, 每帧输出标注帧

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use image::RgbImage;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alert::{AlertEmitter, AlertRequest};
use crate::annotate::Annotator;
use crate::config::SentinelConfig;
use crate::detection::{
    CameraHandle, DetectionScheduler, DetectionStage, GreedyIouTracker, TrackState, Tracker,
};
use crate::error::{Result, SentinelError};
use crate::input::{
    probe, run_reader, Frame, FrameCache, FrameSlot, FrameSource, ReaderParams, ReaderSink,
    ReconnectDecision, ReconnectPolicy, ReconnectState, SourceConnector, StreamStats,
};

/// 检测线程等待帧槽的超时 (也是停止信号的最长响应时间)
const SLOT_POLL: Duration = Duration::from_millis(100);
/// 不可用状态下检查停止信号的间隔
const PARK_POLL: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CameraState {
    Streaming,
    Reconnecting,
    /// 重试用尽, 等待配置刷新或手动探测
    Unavailable,
    Stopped,
}

/// 摄像头状态快照
#[derive(Clone, Debug, Serialize)]
pub struct CameraStatus {
    pub camera_id: String,
    pub name: String,
    pub location: String,
    pub state: CameraState,
    pub connected: bool,
    pub avg_fps: f64,
    pub track_count: usize,
    pub frames_read: u64,
    pub frames_dropped: u64,
    pub detection_passes: u64,
    pub subscribers: usize,
}

/// 重新探测信号
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reprobe {
    /// 手动请求: 给一个全新的重试额度
    Manual,
    /// 配置刷新: 冷却窗口已过才会重试
    Refresh,
}

/// 所有摄像头共享的服务
pub struct PipelineServices {
    pub config: SentinelConfig,
    pub connector: Arc<dyn SourceConnector>,
    pub stage: DetectionStage,
    pub emitter: AlertEmitter,
    pub annotator: Annotator,
}

// ========== 摄像头上下文 ==========

/// 单路摄像头的全部状态, 注册表与两个工作线程共享
pub struct CameraContext {
    pub camera_id: String,
    handle: RwLock<CameraHandle>,
    running: AtomicBool,
    /// 原始最新帧
    pub(crate) raw: FrameCache,
    /// 标注后的最新帧
    pub(crate) display: FrameCache,
    slot: FrameSlot,
    tracker: Mutex<Box<dyn Tracker>>,
    pub(crate) stats: StreamStats,
    state: Mutex<CameraState>,
    detection_passes: AtomicU64,
    subscribers: AtomicUsize,
    detection_warned: AtomicBool,
    reprobe_tx: Sender<Reprobe>,
    reprobe_rx: Receiver<Reprobe>,
}

impl CameraContext {
    pub fn new(handle: CameraHandle, config: &SentinelConfig) -> Self {
        let (reprobe_tx, reprobe_rx) = bounded(4);
        Self {
            camera_id: handle.camera_id.clone(),
            handle: RwLock::new(handle),
            running: AtomicBool::new(true),
            raw: FrameCache::new(config.freshness()),
            display: FrameCache::new(config.freshness()),
            slot: FrameSlot::new(config.frame_slot_capacity),
            tracker: Mutex::new(Box::new(GreedyIouTracker::new(config.tracker_params()))),
            stats: StreamStats::default(),
            state: Mutex::new(CameraState::Streaming),
            detection_passes: AtomicU64::new(0),
            subscribers: AtomicUsize::new(0),
            detection_warned: AtomicBool::new(false),
            reprobe_tx,
            reprobe_rx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn handle(&self) -> CameraHandle {
        self.handle.read().clone()
    }

    pub(crate) fn update_handle(&self, f: impl FnOnce(&mut CameraHandle)) {
        f(&mut self.handle.write());
    }

    pub fn state(&self) -> CameraState {
        *self.state.lock()
    }

    fn set_state(&self, state: CameraState) {
        *self.state.lock() = state;
    }

    pub fn connected(&self) -> bool {
        self.stats.connected()
    }

    pub fn latest_frame(&self, now: Instant) -> Option<Frame> {
        self.raw.latest(now)
    }

    /// 标注帧优先, 没有时退回原始帧
    pub fn latest_display_frame(&self, now: Instant) -> Option<Frame> {
        self.display.latest(now).or_else(|| self.raw.latest(now))
    }

    pub fn track_count(&self) -> usize {
        self.tracker.lock().track_count()
    }

    pub(crate) fn subscribe(&self) {
        self.subscribers.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn unsubscribe(&self) {
        self.subscribers.fetch_sub(1, Ordering::AcqRel);
    }

    /// 发送重新探测信号; 队列已满时合并
    pub(crate) fn reprobe(&self, kind: Reprobe) {
        let _ = self.reprobe_tx.try_send(kind);
    }

    pub fn status(&self) -> CameraStatus {
        let handle = self.handle.read();
        CameraStatus {
            camera_id: self.camera_id.clone(),
            name: handle.display_name().to_string(),
            location: handle.location.clone(),
            state: self.state(),
            connected: self.stats.connected(),
            avg_fps: self.stats.fps(),
            track_count: self.track_count(),
            frames_read: self.stats.frames_read(),
            frames_dropped: self.slot.dropped(),
            detection_passes: self.detection_passes.load(Ordering::Relaxed),
            subscribers: self.subscribers.load(Ordering::Acquire),
        }
    }

    fn sink(&self) -> ReaderSink<'_> {
        ReaderSink {
            camera_id: &self.camera_id,
            running: &self.running,
            slot: &self.slot,
            cache: &self.raw,
            stats: &self.stats,
        }
    }

    /// 发布探测到的首帧
    pub(crate) fn publish_first(&self, image: RgbImage) {
        self.stats.set_connected(true);
        self.sink().publish(Frame::new(image, self.stats.next_seq()));
    }

    /// 停止后清理: 清空帧槽和缓存, 清除跟踪
    pub(crate) fn drain(&self) {
        let drained = self.slot.drain();
        self.raw.clear();
        self.display.clear();
        self.tracker.lock().reset();
        self.stats.set_connected(false);
        self.set_state(CameraState::Stopped);
        debug!(camera_id = %self.camera_id, drained, "🧹 摄像头状态已清理");
    }

    /// 在 `timeout` 内等待重新探测信号, 期间每隔一段时间检查停止标志
    fn wait_reprobe(&self, timeout: Duration) -> Option<Reprobe> {
        let deadline = Instant::now() + timeout;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            match self.reprobe_rx.recv_timeout((deadline - now).min(PARK_POLL)) {
                Ok(kind) => return Some(kind),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
        None
    }
}

// ========== 工作线程 ==========

/// 一路摄像头的工作线程句柄
pub struct CameraWorkers {
    handles: Vec<JoinHandle<()>>,
    done_rx: Receiver<()>,
}

impl CameraWorkers {
    /// 启动采集线程与检测线程; `source` 为注册探测时已打开的源
    pub fn spawn(
        ctx: Arc<CameraContext>,
        services: Arc<PipelineServices>,
        source: Option<Box<dyn FrameSource>>,
    ) -> Result<Self> {
        let (done_tx, done_rx) = bounded::<()>(0);

        let capture = {
            let ctx = ctx.clone();
            let services = services.clone();
            let done = done_tx.clone();
            thread::Builder::new()
                .name(format!("capture-{}", ctx.camera_id))
                .spawn(move || {
                    run_capture(&ctx, &services, source);
                    drop(done);
                })?
        };

        let pipeline = {
            let ctx = ctx.clone();
            thread::Builder::new()
                .name(format!("detect-{}", ctx.camera_id))
                .spawn(move || {
                    run_pipeline(&ctx, &services);
                    drop(done_tx);
                })
        };
        let pipeline = match pipeline {
            Ok(h) => h,
            Err(e) => {
                ctx.stop();
                return Err(e.into());
            }
        };

        Ok(Self {
            handles: vec![capture, pipeline],
            done_rx,
        })
    }

    /// 等待线程退出; 超时则放弃等待 (线程在当前阻塞调用返回后自行退出)
    pub fn join(self, camera_id: &str, timeout: Duration) -> bool {
        match self.done_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => {
                for h in self.handles {
                    if h.join().is_err() {
                        warn!(camera_id, "⚠️  工作线程异常退出");
                    }
                }
                true
            }
            _ => {
                warn!(camera_id, "⚠️  工作线程 {:?} 内未退出, 不再等待", timeout);
                false
            }
        }
    }
}

/// 采集线程: 读流, 断线后按重连策略重新探测
fn run_capture(ctx: &CameraContext, services: &PipelineServices, source: Option<Box<dyn FrameSource>>) {
    let config = &services.config;
    let policy = config.reconnect_policy();
    let params = ReaderParams {
        failure_limit: config.reader_failure_limit.max(1),
        retry: config.reader_retry(),
    };
    let mut reconnect = ReconnectState::new();
    let mut source = source;

    while ctx.is_running() {
        let mut src = match source.take() {
            Some(s) => s,
            None => match reconnect_once(ctx, services, &mut reconnect, &policy) {
                Some(s) => s,
                None => continue,
            },
        };

        ctx.set_state(CameraState::Streaming);
        match run_reader(src.as_mut(), &ctx.sink(), params) {
            Ok(()) => break,
            Err(e) => {
                warn!(camera_id = %ctx.camera_id, "📴 {}", e);
                ctx.set_state(CameraState::Reconnecting);
            }
        }
        // 释放源句柄后再重连
        drop(src);
    }
    debug!(camera_id = %ctx.camera_id, "采集线程退出");
}

/// 一次重连尝试; 成功返回已发布首帧的源
fn reconnect_once(
    ctx: &CameraContext,
    services: &PipelineServices,
    reconnect: &mut ReconnectState,
    policy: &ReconnectPolicy,
) -> Option<Box<dyn FrameSource>> {
    let now = Instant::now();
    match reconnect.check(now, policy) {
        ReconnectDecision::Attempt => {
            ctx.set_state(CameraState::Reconnecting);
            let uri = ctx.handle.read().uri.clone();
            match probe(services.connector.as_ref(), &uri) {
                Ok((source, first)) => {
                    reconnect.record_success();
                    while ctx.reprobe_rx.try_recv().is_ok() {}
                    info!(camera_id = %ctx.camera_id, "🔌 重连成功");
                    ctx.publish_first(first);
                    Some(source)
                }
                Err(e) => {
                    reconnect.record_failure(now);
                    warn!(
                        camera_id = %ctx.camera_id,
                        attempt = reconnect.attempts(),
                        "🔁 重连失败: {:#}",
                        e
                    );
                    if ctx.wait_reprobe(services.config.reconnect_delay()) == Some(Reprobe::Manual) {
                        reconnect.reset();
                    }
                    None
                }
            }
        }
        ReconnectDecision::Refuse { retry_after } => {
            if ctx.state() != CameraState::Unavailable {
                warn!(
                    camera_id = %ctx.camera_id,
                    "⛔ 重连{}次失败, 摄像头不可用 (冷却剩余 {:.0}s, 等待配置刷新或手动探测)",
                    reconnect.attempts(),
                    retry_after.as_secs_f64()
                );
                ctx.set_state(CameraState::Unavailable);
            }
            while ctx.is_running() {
                match ctx.wait_reprobe(PARK_POLL) {
                    Some(Reprobe::Manual) => {
                        info!(camera_id = %ctx.camera_id, "🔍 手动重新探测");
                        reconnect.reset();
                        break;
                    }
                    Some(Reprobe::Refresh) => break,
                    None => continue,
                }
            }
            None
        }
    }
}

/// 检测线程: 每帧调度检测, 并输出标注帧
fn run_pipeline(ctx: &CameraContext, services: &PipelineServices) {
    let config = &services.config;
    let mut scheduler = DetectionScheduler::new(&config.detection_policy, config.source_fps);

    while ctx.is_running() {
        let Some(frame) = ctx.slot.recv_timeout(SLOT_POLL) else {
            continue;
        };
        let handle = ctx.handle();

        if scheduler.should_run(frame.captured_at) {
            detection_pass(ctx, services, &handle, &frame);
        }

        // 标注只读取当前估计, 不推进滤波器
        let tracks = ctx.tracker.lock().tracks();
        let annotated = services.annotator.annotate(
            &frame.image,
            handle.display_name(),
            ctx.stats.fps(),
            &tracks,
            &handle.labels,
        );
        ctx.display.put(Frame {
            image: Arc::new(annotated),
            ..frame
        });
    }
    debug!(camera_id = %ctx.camera_id, "检测线程退出");
}

/// 一次检测通过: 检测 → 跟踪 → 告警
///
/// 外部模型调用期间不持有跟踪锁。
pub(crate) fn detection_pass(
    ctx: &CameraContext,
    services: &PipelineServices,
    handle: &CameraHandle,
    frame: &Frame,
) {
    let detections = match services.stage.run(&ctx.camera_id, frame, &handle.labels) {
        Ok(d) => d,
        Err(SentinelError::DetectionUnavailable(reason)) => {
            if !ctx.detection_warned.swap(true, Ordering::AcqRel) {
                warn!(camera_id = %ctx.camera_id, "⚠️  检测不可用, 仅推流: {}", reason);
            }
            return;
        }
        Err(e) => {
            warn!(camera_id = %ctx.camera_id, "⚠️  检测失败: {}", e);
            return;
        }
    };

    let now = frame.captured_at;
    let (report, tracks) = {
        let mut tracker = ctx.tracker.lock();
        let report = tracker.update(&detections, now);
        (report, tracker.tracks())
    };
    ctx.detection_passes.fetch_add(1, Ordering::Relaxed);
    if !report.created.is_empty() || !report.removed.is_empty() {
        debug!(
            camera_id = %ctx.camera_id,
            created = ?report.created,
            removed = ?report.removed,
            "跟踪更新"
        );
    }

    for track in tracks
        .iter()
        .filter(|t| t.state == TrackState::Active && handle.labels.is_alert(&t.label))
    {
        let request = AlertRequest {
            camera_id: &ctx.camera_id,
            camera_name: handle.display_name(),
            location: &handle.location,
            track_id: track.id,
            label: &track.label,
            count: detections.len(),
            confidence: track.confidence,
            captured_at: frame.wall_time,
        };
        let render = || {
            services.annotator.annotate(
                &frame.image,
                handle.display_name(),
                ctx.stats.fps(),
                &tracks,
                &handle.labels,
            )
        };
        if let Err(e) = services.emitter.emit(&request, now, render) {
            warn!(camera_id = %ctx.camera_id, track_id = track.id, "⚠️  告警截图保存失败: {}", e);
        }
    }
}
