// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 摄像头注册表 (Camera Registry)
//!
//! 唯一创建/销毁单路摄像头状态的地方。注册表锁只保护增删与配置替换,
//! 并使用有界等待, 单个摄像头卡住不会拖住整个注册表。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::alert::{AlertEmitter, AlertEvent};
use crate::annotate::Annotator;
use crate::camera::{CameraContext, CameraState, CameraStatus, CameraWorkers, PipelineServices, Reprobe};
use crate::config::SentinelConfig;
use crate::detection::{
    CameraHandle, DetectionStage, LabelSet, ObjectDetector, PromptCache, SemanticClassifier,
    TargetLabel,
};
use crate::error::{Result, SentinelError};
use crate::input::{encode_jpeg, probe, Frame, SourceConnector};
use crate::store::CameraStore;
use crate::stream::FrameStream;

struct CameraEntry {
    ctx: Arc<CameraContext>,
    workers: CameraWorkers,
}

/// 一次配置刷新的结果
#[derive(Clone, Debug, Default, Serialize)]
pub struct RefreshReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// URI 变化, 重新注册
    pub restarted: Vec<String>,
    /// 只有标签变化
    pub relabeled: Vec<String>,
    /// 不可用的摄像头被重新唤起探测
    pub reprobed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl RefreshReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.restarted.is_empty()
            && self.relabeled.is_empty()
            && self.reprobed.is_empty()
            && self.failed.is_empty()
    }
}

/// 注册表构建器
pub struct RegistryBuilder {
    config: SentinelConfig,
    connector: Arc<dyn SourceConnector>,
    detector: Option<Arc<dyn ObjectDetector>>,
    classifier: Option<Arc<dyn SemanticClassifier>>,
}

impl RegistryBuilder {
    pub fn detector(mut self, detector: Arc<dyn ObjectDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn SemanticClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// 返回注册表与告警事件接收端
    pub fn build(self) -> Result<(CameraRegistry, Receiver<AlertEvent>)> {
        let config = self.config;
        let (emitter, alerts) = AlertEmitter::new(
            &config.snapshot_dir,
            config.alert_cooldown(),
            config.snapshot_jpeg_quality,
            config.alert_log.as_deref(),
        )?;
        let prompts = Arc::new(PromptCache::new());
        let stage = DetectionStage::new(
            self.detector,
            self.classifier,
            prompts.clone(),
            config.detection_thresholds(),
        );
        if !stage.is_available() {
            warn!("⚠️  检测模型未加载, 只推流不检测");
        }
        let annotator = Annotator::new(config.font_path.as_deref());
        let lock_timeout = config.registry_lock_timeout();
        let join_timeout = config.join_timeout();

        let services = Arc::new(PipelineServices {
            config,
            connector: self.connector,
            stage,
            emitter,
            annotator,
        });
        Ok((
            CameraRegistry {
                cameras: RwLock::new(HashMap::new()),
                services,
                prompts,
                lock_timeout,
                join_timeout,
            },
            alerts,
        ))
    }
}

pub struct CameraRegistry {
    cameras: RwLock<HashMap<String, CameraEntry>>,
    services: Arc<PipelineServices>,
    prompts: Arc<PromptCache>,
    lock_timeout: Duration,
    join_timeout: Duration,
}

impl CameraRegistry {
    pub fn builder(config: SentinelConfig, connector: Arc<dyn SourceConnector>) -> RegistryBuilder {
        RegistryBuilder {
            config,
            connector,
            detector: None,
            classifier: None,
        }
    }

    pub fn config(&self) -> &SentinelConfig {
        &self.services.config
    }

    // ========== 生命周期 ==========

    /// 注册摄像头: 先探测 (打开 + 读首帧), 成功后才创建状态
    pub fn register(&self, handle: CameraHandle) -> Result<()> {
        let camera_id = handle.camera_id.clone();
        if self.read_lock()?.contains_key(&camera_id) {
            return Err(SentinelError::DuplicateCamera(camera_id));
        }

        // 探测期间不持有注册表锁
        let (source, first) = probe(self.services.connector.as_ref(), &handle.uri)
            .map_err(|e| SentinelError::connection_failed(&camera_id, format!("{:#}", e)))?;

        let mut cameras = self.write_lock()?;
        if cameras.contains_key(&camera_id) {
            return Err(SentinelError::DuplicateCamera(camera_id));
        }
        let ctx = Arc::new(CameraContext::new(handle, &self.services.config));
        ctx.publish_first(first);
        let workers = CameraWorkers::spawn(ctx.clone(), self.services.clone(), Some(source))?;
        cameras.insert(camera_id.clone(), CameraEntry { ctx, workers });
        drop(cameras);

        info!(camera_id = %camera_id, "📷 摄像头已注册");
        Ok(())
    }

    /// 注销摄像头; 不存在时为空操作
    pub fn unregister(&self, camera_id: &str) -> Result<()> {
        let entry = self.write_lock()?.remove(camera_id);
        if let Some(entry) = entry {
            self.teardown(entry);
            info!(camera_id, "🗑️  摄像头已注销");
        }
        Ok(())
    }

    /// 停止顺序: 停止标志 → 等待线程 → 清空帧槽/缓存/跟踪 → 清理告警冷却
    fn teardown(&self, entry: CameraEntry) {
        let CameraEntry { ctx, workers } = entry;
        ctx.stop();
        workers.join(&ctx.camera_id, self.join_timeout);
        ctx.drain();
        self.services.emitter.forget(&ctx.camera_id);
    }

    /// 原子替换标签集合, 并使旧标签集合的提示词缓存失效
    pub fn update_config(&self, camera_id: &str, labels: Vec<TargetLabel>) -> Result<()> {
        let labels = LabelSet::new(labels)?;
        let ctx = self.context(camera_id)?;
        let mut old = None;
        ctx.update_handle(|h| old = Some(std::mem::replace(&mut h.labels, labels)));
        if let Some(old) = old {
            self.prompts.invalidate(&old);
        }
        info!(camera_id, "🏷️  目标标签已更新");
        Ok(())
    }

    /// 手动重新探测 (不可用状态下给一个全新的重试额度)
    pub fn request_reprobe(&self, camera_id: &str) -> Result<()> {
        self.context(camera_id)?.reprobe(Reprobe::Manual);
        Ok(())
    }

    /// 与配置来源对账: 新增/删除/URI变化重启/标签变化更新/唤起不可用摄像头
    pub fn refresh(&self, store: &dyn CameraStore) -> Result<RefreshReport> {
        let desired = store.list_cameras()?;
        let live: HashMap<String, Arc<CameraContext>> = self
            .read_lock()?
            .iter()
            .map(|(id, e)| (id.clone(), e.ctx.clone()))
            .collect();
        let mut report = RefreshReport::default();

        for handle in &desired {
            let id = handle.camera_id.clone();
            match live.get(&id) {
                None => match self.register(handle.clone()) {
                    Ok(()) => report.added.push(id),
                    Err(e) => report.failed.push((id, e.to_string())),
                },
                Some(ctx) => {
                    let current = ctx.handle();
                    if current.uri != handle.uri {
                        if let Err(e) = self.unregister(&id) {
                            report.failed.push((id, e.to_string()));
                            continue;
                        }
                        match self.register(handle.clone()) {
                            Ok(()) => report.restarted.push(id),
                            Err(e) => report.failed.push((id, e.to_string())),
                        }
                        continue;
                    }
                    if current.labels != handle.labels {
                        match self.update_config(&id, handle.labels.labels().to_vec()) {
                            Ok(()) => report.relabeled.push(id.clone()),
                            Err(e) => report.failed.push((id.clone(), e.to_string())),
                        }
                    }
                    ctx.update_handle(|h| {
                        h.name = handle.name.clone();
                        h.location = handle.location.clone();
                        h.fps = handle.fps;
                    });
                    if ctx.state() == CameraState::Unavailable {
                        ctx.reprobe(Reprobe::Refresh);
                        report.reprobed.push(id);
                    }
                }
            }
        }

        for id in live.keys() {
            if !desired.iter().any(|h| &h.camera_id == id) {
                match self.unregister(id) {
                    Ok(()) => report.removed.push(id.clone()),
                    Err(e) => report.failed.push((id.clone(), e.to_string())),
                }
            }
        }

        if !report.is_empty() {
            info!(
                added = report.added.len(),
                removed = report.removed.len(),
                restarted = report.restarted.len(),
                relabeled = report.relabeled.len(),
                failed = report.failed.len(),
                "🔄 配置刷新"
            );
        }
        Ok(report)
    }

    /// 停止所有摄像头
    pub fn shutdown_all(&self) -> Result<()> {
        let entries: Vec<CameraEntry> = self.write_lock()?.drain().map(|(_, e)| e).collect();
        for entry in entries {
            self.teardown(entry);
        }
        Ok(())
    }

    // ========== 查询 ==========

    pub fn camera_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.read_lock()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// 最新原始帧; 未注册或超过新鲜度窗口时为 None
    pub fn latest_frame(&self, camera_id: &str) -> Option<Frame> {
        self.context(camera_id).ok()?.latest_frame(Instant::now())
    }

    /// 最新帧的 JPEG 编码
    pub fn latest_jpeg(&self, camera_id: &str) -> Result<Option<Vec<u8>>> {
        match self.context(camera_id)?.latest_frame(Instant::now()) {
            Some(frame) => Ok(Some(encode_jpeg(&frame.image, self.services.config.latest_jpeg_quality)?)),
            None => Ok(None),
        }
    }

    pub fn camera_handle(&self, camera_id: &str) -> Result<CameraHandle> {
        Ok(self.context(camera_id)?.handle())
    }

    pub fn camera_status(&self, camera_id: &str) -> Result<CameraStatus> {
        Ok(self.context(camera_id)?.status())
    }

    pub fn all_statuses(&self) -> Result<Vec<CameraStatus>> {
        let contexts: Vec<Arc<CameraContext>> = self.read_lock()?.values().map(|e| e.ctx.clone()).collect();
        let mut out: Vec<CameraStatus> = contexts.iter().map(|c| c.status()).collect();
        out.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        Ok(out)
    }

    /// 按摄像头帧率推送 JPEG 帧; 每个订阅者一个独立的流
    pub fn stream_frames(&self, camera_id: &str) -> Result<FrameStream> {
        Ok(FrameStream::new(self.context(camera_id)?, self.services.clone()))
    }

    // ========== 内部 ==========

    fn context(&self, camera_id: &str) -> Result<Arc<CameraContext>> {
        self.read_lock()?
            .get(camera_id)
            .map(|e| e.ctx.clone())
            .ok_or_else(|| SentinelError::CameraNotFound(camera_id.to_string()))
    }

    fn read_lock(
        &self,
    ) -> Result<parking_lot::RwLockReadGuard<'_, HashMap<String, CameraEntry>>> {
        self.cameras
            .try_read_for(self.lock_timeout)
            .ok_or(SentinelError::RegistryBusy(self.lock_timeout))
    }

    fn write_lock(
        &self,
    ) -> Result<parking_lot::RwLockWriteGuard<'_, HashMap<String, CameraEntry>>> {
        self.cameras
            .try_write_for(self.lock_timeout)
            .ok_or(SentinelError::RegistryBusy(self.lock_timeout))
    }
}

impl Drop for CameraRegistry {
    fn drop(&mut self) {
        let entries: Vec<CameraEntry> = self.cameras.get_mut().drain().map(|(_, e)| e).collect();
        for entry in entries {
            self.teardown(entry);
        }
    }
}
