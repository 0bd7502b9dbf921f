// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 告警发射器
//!
//! 按 (摄像头, 跟踪ID) 限流; 通过冷却检查后才渲染截图、写盘、发出事件。
//! 截图路径: `{root}/{YYYY-MM-DD}/{camera}/{label}/{HHMMSS_ffffff}_n{count}_c{conf}_t{track}.jpg`

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use crossbeam_channel::{unbounded, Receiver, Sender};
use image::RgbImage;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::input::encode_jpeg;

/// 冷却表超过该大小时清理过期条目
const PRUNE_THRESHOLD: usize = 256;

static UNSAFE_PATH_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}_\-]+").expect("static regex"));

/// 告警事件 (同时也是告警日志的一行)
#[derive(Clone, Debug, Serialize)]
pub struct AlertEvent {
    pub camera_id: String,
    pub camera_name: String,
    pub location: String,
    pub track_id: u32,
    pub label: String,
    /// 本次检测通过中的检测数
    pub count: usize,
    pub confidence: f32,
    pub timestamp: DateTime<Local>,
    pub snapshot: PathBuf,
}

/// 一次告警请求
#[derive(Clone, Debug)]
pub struct AlertRequest<'a> {
    pub camera_id: &'a str,
    pub camera_name: &'a str,
    pub location: &'a str,
    pub track_id: u32,
    pub label: &'a str,
    pub count: usize,
    pub confidence: f32,
    pub captured_at: DateTime<Local>,
}

pub struct AlertEmitter {
    root: PathBuf,
    cooldown: Duration,
    jpeg_quality: u8,
    last_alert: Mutex<HashMap<(String, u32), Instant>>,
    tx: Sender<AlertEvent>,
    log: Option<Mutex<File>>,
}

impl AlertEmitter {
    /// 返回发射器与事件接收端
    pub fn new(
        root: &Path,
        cooldown: Duration,
        jpeg_quality: u8,
        log_path: Option<&Path>,
    ) -> Result<(Self, Receiver<AlertEvent>)> {
        let log = match log_path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                info!("📒 告警日志: {}", path.display());
                Some(Mutex::new(file))
            }
            None => None,
        };
        let (tx, rx) = unbounded();
        Ok((
            Self {
                root: root.to_path_buf(),
                cooldown,
                jpeg_quality,
                last_alert: Mutex::new(HashMap::new()),
                tx,
                log,
            },
            rx,
        ))
    }

    /// 原子地检查并占用冷却窗口; 返回 true 表示本次可以告警
    pub fn try_claim(&self, camera_id: &str, track_id: u32, now: Instant) -> bool {
        let mut last = self.last_alert.lock();
        let key = (camera_id.to_string(), track_id);
        if let Some(prev) = last.get(&key) {
            if now.saturating_duration_since(*prev) < self.cooldown {
                return false;
            }
        }
        // 跟踪ID只增不减: 超过阈值时清掉已过冷却期的条目
        if last.len() >= PRUNE_THRESHOLD {
            let cooldown = self.cooldown;
            last.retain(|_, t| now.saturating_duration_since(*t) < cooldown);
        }
        last.insert(key, now);
        true
    }

    /// 撤销 `now` 时刻的占用 (仅当未被后来者覆盖)
    fn release(&self, camera_id: &str, track_id: u32, now: Instant) {
        let mut last = self.last_alert.lock();
        let key = (camera_id.to_string(), track_id);
        if last.get(&key) == Some(&now) {
            last.remove(&key);
        }
    }

    /// 冷却通过后渲染截图、写盘并发出事件; 冷却中返回 `Ok(None)`
    ///
    /// 截图写入失败时释放冷却, 下一次检测通过可以重试。
    pub fn emit(
        &self,
        request: &AlertRequest<'_>,
        now: Instant,
        render: impl FnOnce() -> RgbImage,
    ) -> Result<Option<AlertEvent>> {
        if !self.try_claim(request.camera_id, request.track_id, now) {
            return Ok(None);
        }

        let path = match self.write_snapshot(request, render) {
            Ok(path) => path,
            Err(e) => {
                self.release(request.camera_id, request.track_id, now);
                warn!(
                    camera_id = request.camera_id,
                    track_id = request.track_id,
                    "⚠️ 告警截图写入失败: {}",
                    e
                );
                return Err(e);
            }
        };

        let event = AlertEvent {
            camera_id: request.camera_id.to_string(),
            camera_name: request.camera_name.to_string(),
            location: request.location.to_string(),
            track_id: request.track_id,
            label: request.label.to_string(),
            count: request.count,
            confidence: request.confidence,
            timestamp: request.captured_at,
            snapshot: path,
        };
        // 日志写入失败不影响事件发布
        if let Err(e) = self.append_log(&event) {
            warn!(camera_id = request.camera_id, "⚠️ 告警日志写入失败: {}", e);
        }
        info!(
            camera_id = request.camera_id,
            track_id = request.track_id,
            "🚨 告警: {} ({:.2}) → {}",
            event.label,
            event.confidence,
            event.snapshot.display()
        );
        if self.tx.send(event.clone()).is_err() {
            debug!("告警接收端已关闭");
        }
        Ok(Some(event))
    }

    fn write_snapshot(
        &self,
        request: &AlertRequest<'_>,
        render: impl FnOnce() -> RgbImage,
    ) -> Result<PathBuf> {
        let path = snapshot_path(
            &self.root,
            &request.captured_at,
            request.camera_id,
            request.label,
            request.count,
            request.confidence,
            request.track_id,
        );
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let jpeg = encode_jpeg(&render(), self.jpeg_quality)?;
        fs::write(&path, jpeg)?;
        Ok(path)
    }

    fn append_log(&self, event: &AlertEvent) -> Result<()> {
        if let Some(log) = &self.log {
            let mut line = serde_json::to_string(event)?;
            line.push('\n');
            log.lock().write_all(line.as_bytes())?;
        }
        Ok(())
    }

    /// 移除摄像头时清理其冷却状态
    pub fn forget(&self, camera_id: &str) {
        self.last_alert.lock().retain(|(cam, _), _| cam != camera_id);
    }

    /// 当前持有冷却记录的轨迹数
    pub fn claimed_tracks(&self) -> usize {
        self.last_alert.lock().len()
    }
}

/// 文件名安全的标签 (保留各国文字)
pub fn safe_label(label: &str) -> String {
    let s = UNSAFE_PATH_CHARS.replace_all(label.trim(), "_");
    let s = s.trim_matches('_');
    if s.is_empty() {
        "unknown".to_string()
    } else {
        s.to_string()
    }
}

/// 截图路径: 日期/摄像头/标签 分目录, 文件名编码时间、检测数、置信度、跟踪ID
pub fn snapshot_path(
    root: &Path,
    captured_at: &DateTime<Local>,
    camera_id: &str,
    label: &str,
    count: usize,
    confidence: f32,
    track_id: u32,
) -> PathBuf {
    root.join(captured_at.format("%Y-%m-%d").to_string())
        .join(safe_label(camera_id))
        .join(safe_label(label))
        .join(format!(
            "{}_n{}_c{:.2}_t{}.jpg",
            captured_at.format("%H%M%S_%6f"),
            count,
            confidence,
            track_id
        ))
}
