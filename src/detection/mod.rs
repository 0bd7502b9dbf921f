// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 检测系统 (Detection System)
///
/// 检测/跟踪线程使用的全部组件
/// - Scheduler:  检测节流 (时间间隔或帧跳过)
/// - Detector:   粗检测 + 外扩裁剪 + 语义分类
/// - Tracker:    卡尔曼滤波 + 贪心IOU匹配
/// - Stabilizer: 标签多数投票 + 迟滞
pub mod classifier;
pub mod detector;
pub mod kalman;
pub mod scheduler;
pub mod stabilizer;
pub mod tracker;
pub mod types;

pub use classifier::{clip_logits, softmax, PromptCache, PromptEncoding, SemanticClassifier, SINK_PROMPT};
pub use detector::{DetectionStage, DetectionThresholds, ObjectDetector};
pub use kalman::KalmanBoxFilter;
pub use scheduler::DetectionScheduler;
pub use stabilizer::LabelStabilizer;
pub use tracker::{
    compute_iou, greedy_match, GreedyIouTracker, PassReport, TrackState, TrackView, Tracker,
    TrackerParams,
};
pub use types::{BBox, CameraHandle, Detection, LabelSet, TargetLabel};
