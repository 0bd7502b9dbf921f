// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 多目标跟踪 (卡尔曼预测 + 贪心IOU匹配)
//! Multi-object tracking with greedy IOU assignment

use std::time::{Duration, Instant};

use super::kalman::KalmanBoxFilter;
use super::stabilizer::LabelStabilizer;
use super::types::{BBox, Detection};

// ========== 公共数据结构 ==========

/// 跟踪器参数
#[derive(Clone, Copy, Debug)]
pub struct TrackerParams {
    /// 匹配要求 IOU 严格大于此值
    pub match_iou_threshold: f32,
    /// 连续丢失次数超过此值则删除
    pub max_missed: u32,
    /// 超过此时长未更新则删除
    pub max_idle: Duration,
    pub label_history: usize,
    pub stable_agreement: u32,
    pub process_noise: f32,
    pub measurement_noise: f32,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            match_iou_threshold: 0.3,
            max_missed: 3,
            max_idle: Duration::from_secs(1),
            label_history: 5,
            stable_agreement: 3,
            process_noise: 0.03,
            measurement_noise: 1.0,
        }
    }
}

/// 跟踪状态: Active → Stale (丢失) → Removed (终态)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    Active,
    Stale,
    Removed,
}

/// 单个跟踪目标
#[derive(Clone, Debug)]
struct Track {
    id: u32,
    filter: KalmanBoxFilter,
    labels: LabelStabilizer,
    /// 最近一次匹配的分类置信度
    confidence: f32,
    missed: u32,
    hits: u32,
    last_update: Instant,
    state: TrackState,
}

impl Track {
    fn should_remove(&self, now: Instant, params: &TrackerParams) -> bool {
        self.missed > params.max_missed
            || now.saturating_duration_since(self.last_update) > params.max_idle
    }
}

/// 跟踪目标快照 (拷贝出锁后用于标注与告警)
#[derive(Clone, Debug)]
pub struct TrackView {
    pub id: u32,
    pub bbox: BBox,
    /// 稳定后的可见标签
    pub label: String,
    pub confidence: f32,
    pub missed: u32,
    pub hits: u32,
    pub state: TrackState,
}

/// 一次检测通过的结果
#[derive(Clone, Debug, Default)]
pub struct PassReport {
    /// (track id, detection index)
    pub matched: Vec<(u32, usize)>,
    pub created: Vec<u32>,
    pub removed: Vec<u32>,
}

// ========== 跟踪器统一接口 ==========

/// 多目标跟踪器 Trait
pub trait Tracker: Send {
    /// 用一次检测通过的结果更新跟踪器
    ///
    /// # 参数
    /// - `detections`: 本次检测结果 (每个最多参与一次匹配)
    /// - `now`: 本次检测的时间
    fn update(&mut self, detections: &[Detection], now: Instant) -> PassReport;

    /// 当前存活的跟踪目标 (不推进滤波器)
    fn tracks(&self) -> Vec<TrackView>;

    /// 重置跟踪器 (清除所有跟踪)
    fn reset(&mut self);

    /// 获取当前跟踪数量
    fn track_count(&self) -> usize;
}

// ========== 贪心IOU跟踪器 ==========

pub struct GreedyIouTracker {
    params: TrackerParams,
    tracks: Vec<Track>,
    next_id: u32,
}

impl GreedyIouTracker {
    pub fn new(params: TrackerParams) -> Self {
        Self {
            params,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    fn spawn(&mut self, det: &Detection, now: Instant) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.tracks.push(Track {
            id,
            filter: KalmanBoxFilter::new(
                &det.bbox,
                self.params.process_noise,
                self.params.measurement_noise,
            ),
            labels: LabelStabilizer::new(
                &det.label,
                self.params.label_history,
                self.params.stable_agreement,
            ),
            confidence: det.label_confidence,
            missed: 0,
            hits: 1,
            last_update: now,
            state: TrackState::Active,
        });
        id
    }
}

impl Tracker for GreedyIouTracker {
    fn update(&mut self, detections: &[Detection], now: Instant) -> PassReport {
        let mut report = PassReport::default();

        // 1. 预测
        let predicted: Vec<BBox> = self.tracks.iter_mut().map(|t| t.filter.predict()).collect();

        // 2-3. 候选对按代价升序, 贪心提交
        let assignments = greedy_match(
            &predicted,
            &detections.iter().map(|d| d.bbox).collect::<Vec<_>>(),
            self.params.match_iou_threshold,
        );

        let mut track_matched = vec![false; self.tracks.len()];
        let mut det_matched = vec![false; detections.len()];
        for (ti, di) in assignments {
            track_matched[ti] = true;
            det_matched[di] = true;

            let det = &detections[di];
            let track = &mut self.tracks[ti];
            track.filter.update(&det.bbox);
            track.labels.observe(&det.label);
            track.confidence = det.label_confidence;
            track.missed = 0;
            track.hits += 1;
            track.last_update = now;
            track.state = TrackState::Active;
            report.matched.push((track.id, di));
        }

        // 4. 未匹配的跟踪: 只保留预测
        for (track, matched) in self.tracks.iter_mut().zip(&track_matched) {
            if !matched {
                track.missed += 1;
                track.state = TrackState::Stale;
            }
        }

        // 5. 未匹配的检测: 新建跟踪
        for (di, det) in detections.iter().enumerate() {
            if !det_matched[di] {
                let id = self.spawn(det, now);
                report.created.push(id);
            }
        }

        // 6. 删除判定
        let params = self.params;
        self.tracks.retain_mut(|t| {
            if t.should_remove(now, &params) {
                t.state = TrackState::Removed;
                report.removed.push(t.id);
                false
            } else {
                true
            }
        });

        report
    }

    fn tracks(&self) -> Vec<TrackView> {
        self.tracks
            .iter()
            .map(|t| TrackView {
                id: t.id,
                bbox: t.filter.state_bbox(),
                label: t.labels.stable().to_string(),
                confidence: t.confidence,
                missed: t.missed,
                hits: t.hits,
                state: t.state,
            })
            .collect()
    }

    fn reset(&mut self) {
        self.tracks.clear();
    }

    fn track_count(&self) -> usize {
        self.tracks.len()
    }
}

// ========== 工具函数 ==========

/// 贪心匹配: 只考虑 IOU > threshold 的候选对, 代价 (1 - IOU) 升序依次提交,
/// 已提交的跟踪或检测不再参与。代价相同时按 (跟踪, 检测) 下标顺序。
///
/// 返回 (跟踪下标, 检测下标)
pub fn greedy_match(tracks: &[BBox], detections: &[BBox], threshold: f32) -> Vec<(usize, usize)> {
    let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
    for (ti, tb) in tracks.iter().enumerate() {
        for (di, db) in detections.iter().enumerate() {
            let iou = compute_iou(tb, db);
            if iou > threshold {
                pairs.push((1.0 - iou, ti, di));
            }
        }
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut used_tracks = vec![false; tracks.len()];
    let mut used_dets = vec![false; detections.len()];
    let mut out = Vec::new();
    for (_, ti, di) in pairs {
        if used_tracks[ti] || used_dets[di] {
            continue;
        }
        used_tracks[ti] = true;
        used_dets[di] = true;
        out.push((ti, di));
    }
    out
}

/// 计算两个边界框的IOU (Intersection over Union)
pub fn compute_iou(bbox1: &BBox, bbox2: &BBox) -> f32 {
    let x1 = bbox1.x1.max(bbox2.x1);
    let y1 = bbox1.y1.max(bbox2.y1);
    let x2 = bbox1.x2.min(bbox2.x2);
    let y2 = bbox1.y2.min(bbox2.y2);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let union = bbox1.area() + bbox2.area() - intersection;

    if union <= 0.0 {
        return 0.0;
    }

    (intersection / union).clamp(0.0, 1.0)
}
