// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 哨兵配置 - 通过JSON文件调整参数

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detection::{DetectionThresholds, TrackerParams};
use crate::input::ReconnectPolicy;

/// 命令行参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "多路摄像头哨兵 - 检测/跟踪/告警", long_about = None)]
pub struct Args {
    /// 阈值配置文件 (不存在时写入默认值)
    #[arg(short, long, default_value = "sentinel.json")]
    pub config: PathBuf,

    /// 摄像头与目标标签列表
    #[arg(long, default_value = "cameras.json")]
    pub cameras: PathBuf,

    /// 截图存档根目录 (覆盖配置文件)
    #[arg(long)]
    pub snapshot_dir: Option<PathBuf>,

    /// 告警日志 (JSON lines)
    #[arg(long)]
    pub alert_log: Option<PathBuf>,

    /// 标注字体 (TTF/OTF)
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// 配置刷新周期 (秒)
    #[arg(long, default_value_t = 10)]
    pub refresh_secs: u64,

    /// 运行时长 (秒), 不设置则一直运行
    #[arg(long)]
    pub run_secs: Option<u64>,
}

/// 检测调度策略
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DetectionPolicy {
    /// 距上次检测至少间隔 `secs` 秒
    Interval { secs: f64 },
    /// 每 N 帧检测一次, N = max(1, source_fps / max_fps)
    FrameSkip { max_fps: f64 },
}

impl Default for DetectionPolicy {
    fn default() -> Self {
        DetectionPolicy::Interval { secs: 0.5 }
    }
}

/// 哨兵参数配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    // === 检测参数 ===
    pub detector_confidence: f32,   // 粗检测置信度阈值
    pub target_class_id: u32,       // 粗检测目标类别 (0 = person)
    pub classifier_threshold: f32,  // 语义分类最低概率
    pub box_margin: f32,            // 裁剪外扩比例
    pub detection_policy: DetectionPolicy,
    pub source_fps: f64,            // 帧跳过模式下假定的源帧率

    // === 跟踪参数 ===
    pub match_iou_threshold: f32,   // 匹配最低IOU
    pub max_missed: u32,            // 连续丢失超过此值则删除
    pub max_idle_secs: f64,         // 超过此时长未更新则删除
    pub label_history: usize,       // 标签历史长度
    pub stable_agreement: u32,      // 稳定标签所需连续一致次数
    pub kalman_process_noise: f32,  // 过程噪声 q
    pub kalman_measurement_noise: f32, // 观测噪声 r

    // === 读流参数 ===
    pub reader_failure_limit: u32,
    pub reader_retry_ms: u64,
    pub frame_slot_capacity: usize,
    pub freshness_secs: f64,

    // === 重连参数 ===
    pub reconnect_max_attempts: u32,
    pub reconnect_window_secs: f64,
    pub reconnect_delay_ms: u64,    // 两次重连尝试之间的等待

    // === 告警参数 ===
    pub alert_cooldown_secs: f64,
    pub snapshot_dir: PathBuf,
    pub alert_log: Option<PathBuf>,
    pub font_path: Option<PathBuf>,
    pub snapshot_jpeg_quality: u8,

    // === 推流参数 ===
    pub stream_jpeg_quality: u8,
    pub latest_jpeg_quality: u8,

    // === 注册表 ===
    pub registry_lock_timeout_ms: u64,
    pub join_timeout_ms: u64,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            // 检测
            detector_confidence: 0.5,
            target_class_id: 0,
            classifier_threshold: 0.6,
            box_margin: 0.15,
            detection_policy: DetectionPolicy::default(),
            source_fps: 30.0,

            // 跟踪
            match_iou_threshold: 0.3,
            max_missed: 3,
            max_idle_secs: 1.0,
            label_history: 5,
            stable_agreement: 3,
            kalman_process_noise: 0.03,
            kalman_measurement_noise: 1.0,

            // 读流
            reader_failure_limit: 10,
            reader_retry_ms: 100,
            frame_slot_capacity: 2,
            freshness_secs: 5.0,

            // 重连
            reconnect_max_attempts: 3,
            reconnect_window_secs: 30.0,
            reconnect_delay_ms: 1000,

            // 告警
            alert_cooldown_secs: 5.0,
            snapshot_dir: PathBuf::from("screenshots"),
            alert_log: None,
            font_path: None,
            snapshot_jpeg_quality: 90,

            // 推流
            stream_jpeg_quality: 70,
            latest_jpeg_quality: 80,

            // 注册表
            registry_lock_timeout_ms: 2000,
            join_timeout_ms: 3000,
        }
    }
}

impl SentinelConfig {
    /// 从JSON文件加载配置
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    warn!("❌ 保存配置失败: {}", e);
                }
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    /// 命令行参数覆盖文件配置
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(dir) = &args.snapshot_dir {
            self.snapshot_dir = dir.clone();
        }
        if args.alert_log.is_some() {
            self.alert_log = args.alert_log.clone();
        }
        if args.font.is_some() {
            self.font_path = args.font.clone();
        }
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️  当前哨兵配置:");
        info!("  检测置信度: {:.2}", self.detector_confidence);
        info!("  分类阈值: {:.2}", self.classifier_threshold);
        info!("  裁剪外扩: {:.0}%", self.box_margin * 100.0);
        info!("  调度策略: {:?}", self.detection_policy);
        info!(
            "  跟踪删除: 丢失>{}次 或 {:.1}s未更新",
            self.max_missed, self.max_idle_secs
        );
        info!(
            "  重连: {}次 / {:.0}s 窗口",
            self.reconnect_max_attempts, self.reconnect_window_secs
        );
        info!("  告警冷却: {:.1}s", self.alert_cooldown_secs);
    }

    pub fn tracker_params(&self) -> TrackerParams {
        TrackerParams {
            match_iou_threshold: self.match_iou_threshold,
            max_missed: self.max_missed,
            max_idle: secs(self.max_idle_secs),
            label_history: self.label_history.max(1),
            stable_agreement: self.stable_agreement.max(1),
            process_noise: self.kalman_process_noise,
            measurement_noise: self.kalman_measurement_noise,
        }
    }

    pub fn detection_thresholds(&self) -> DetectionThresholds {
        DetectionThresholds {
            target_class_id: self.target_class_id,
            detector_confidence: self.detector_confidence,
            classifier_threshold: self.classifier_threshold,
            box_margin: self.box_margin,
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_max_attempts,
            window: secs(self.reconnect_window_secs),
        }
    }

    pub fn freshness(&self) -> Duration {
        secs(self.freshness_secs)
    }

    pub fn alert_cooldown(&self) -> Duration {
        secs(self.alert_cooldown_secs)
    }

    pub fn reader_retry(&self) -> Duration {
        Duration::from_millis(self.reader_retry_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn registry_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.registry_lock_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// 负数/NaN 按 0 处理
fn secs(v: f64) -> Duration {
    Duration::try_from_secs_f64(v).unwrap_or(Duration::ZERO)
}
