// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测调度器: 决定当前帧是否触发推理
//!
//! 不论是否检测, 每一帧都会继续送去标注和推流。

use std::time::{Duration, Instant};

use crate::config::DetectionPolicy;

#[derive(Debug)]
pub struct DetectionScheduler {
    mode: Mode,
    last_run: Option<Instant>,
    frames_seen: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Interval(Duration),
    EveryN(u64),
}

impl DetectionScheduler {
    /// `source_fps`: 帧跳过模式下假定的输入帧率
    pub fn new(policy: &DetectionPolicy, source_fps: f64) -> Self {
        let mode = match *policy {
            DetectionPolicy::Interval { secs } => {
                Mode::Interval(Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO))
            }
            DetectionPolicy::FrameSkip { max_fps } => Mode::EveryN(every_n(source_fps, max_fps)),
        };
        Self {
            mode,
            last_run: None,
            frames_seen: 0,
        }
    }

    /// 每帧调用一次; 返回 true 表示本帧运行检测。首帧总是检测。
    pub fn should_run(&mut self, now: Instant) -> bool {
        let index = self.frames_seen;
        self.frames_seen += 1;

        let run = match self.mode {
            Mode::EveryN(n) => index % n == 0,
            Mode::Interval(min_gap) => match self.last_run {
                None => true,
                Some(last) => now.saturating_duration_since(last) >= min_gap,
            },
        };
        if run {
            self.last_run = Some(now);
        }
        run
    }

    /// 帧跳过间隔 (时间间隔模式返回 None)
    pub fn every_n(&self) -> Option<u64> {
        match self.mode {
            Mode::EveryN(n) => Some(n),
            Mode::Interval(_) => None,
        }
    }
}

/// N = max(1, floor(source_fps / max_fps))
fn every_n(source_fps: f64, max_fps: f64) -> u64 {
    if max_fps.is_nan() || source_fps.is_nan() || max_fps <= 0.0 || source_fps <= 0.0 {
        return 1;
    }
    ((source_fps / max_fps).floor() as u64).max(1)
}
