// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 数字卫兵 (Digital Sentinel)
///
/// 多路摄像头监控服务
///
/// 系统架构:
/// 1. 每路摄像头: 采集线程 + 检测/跟踪线程
/// 2. 告警线程: 消费告警事件
/// 3. 主线程:   周期性与摄像头配置对账
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use mimalloc::MiMalloc;
use tracing::{error, info, warn};

use cctv_sentinel::store::CameraFile;
use cctv_sentinel::{init_tracing, Args, CameraRegistry, JsonCameraStore, SchemeConnector, SentinelConfig};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    info!("🚀 数字卫兵系统启动");
    let mut config = SentinelConfig::load(&args.config);
    config.apply_args(&args);
    config.print_summary();

    let store = JsonCameraStore::new(args.cameras.clone());
    if !store.path().exists() {
        store
            .write(&CameraFile::default())
            .with_context(|| format!("cannot create {}", store.path().display()))?;
        info!("📝 已创建空的摄像头列表: {}", store.path().display());
    }

    // ========== 注册表 ==========
    // 未接入检测模型时只推流不检测
    let connector = Arc::new(SchemeConnector::with_default_stack());
    if !connector.supports_network() {
        warn!("⚠️  未启用 rtsp 特性, 只能回放图片目录");
    }
    let (registry, alerts) = CameraRegistry::builder(config, connector).build()?;

    // ========== 告警线程 ==========
    let alert_thread = thread::Builder::new()
        .name("alerts".to_string())
        .spawn(move || {
            for event in alerts.iter() {
                warn!(
                    camera_id = %event.camera_id,
                    track_id = event.track_id,
                    label = %event.label,
                    confidence = event.confidence,
                    "🚨 {} ({}) 检测到 {} 📸 {}",
                    event.camera_name,
                    event.location,
                    event.label,
                    event.snapshot.display()
                );
            }
        })?;

    // ========== 主线程: 配置对账 ==========
    let period = Duration::from_secs(args.refresh_secs.max(1));
    let deadline = args.run_secs.map(|s| Instant::now() + Duration::from_secs(s));
    loop {
        match registry.refresh(&store) {
            Ok(report) => {
                for (camera_id, reason) in &report.failed {
                    warn!(camera_id = %camera_id, "⚠️  摄像头未启动: {}", reason);
                }
            }
            Err(e) => error!("❌ 配置刷新失败: {}", e),
        }

        if let Ok(statuses) = registry.all_statuses() {
            for s in statuses {
                info!(
                    camera_id = %s.camera_id,
                    state = ?s.state,
                    fps = s.avg_fps,
                    tracks = s.track_count,
                    "📊 状态"
                );
            }
        }

        let next = Instant::now() + period;
        if deadline.is_some_and(|d| next > d) {
            break;
        }
        thread::sleep(period);
    }

    info!("🛑 正在停止所有摄像头...");
    registry.shutdown_all()?;
    drop(registry);
    if alert_thread.join().is_err() {
        warn!("⚠️  告警线程异常退出");
    }
    info!("👋 数字卫兵已退出");
    Ok(())
}
