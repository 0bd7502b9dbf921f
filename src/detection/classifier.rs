// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 零样本语义分类 (外部模型接口) + 提示词编码缓存

use std::collections::HashMap;
use std::sync::Arc;

use image::RgbImage;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use parking_lot::Mutex;
use tracing::debug;

use super::types::LabelSet;

/// 兜底提示词 ("以上都不是"), 总是排在候选列表最后
pub const SINK_PROMPT: &str = "other object";

/// 编码后的候选提示词
#[derive(Debug)]
pub struct PromptEncoding {
    /// 排序后的摄像头提示词 + 兜底
    pub prompts: Vec<String>,
    /// 每个提示词一行
    pub embeddings: Array2<f32>,
}

impl PromptEncoding {
    pub fn sink_index(&self) -> usize {
        self.prompts.len() - 1
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

/// 语义分类器 Trait
///
/// 实现方在多个摄像头线程间共享, 方法只取 `&self`。
pub trait SemanticClassifier: Send + Sync {
    fn name(&self) -> &str;

    /// 编码候选提示词, 返回 [num_prompts, dim]
    fn encode_prompts(&self, prompts: &[String]) -> anyhow::Result<Array2<f32>>;

    /// 对裁剪区域打分, 返回与 `prompts.prompts` 一一对应的 logits
    fn score(&self, crop: &RgbImage, prompts: &PromptEncoding) -> anyhow::Result<Array1<f32>>;
}

/// 数值稳定的 softmax
pub fn softmax(logits: ArrayView1<f32>) -> Array1<f32> {
    let max_val = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp = logits.mapv(|v| (v - max_val).exp());
    let sum = exp.sum();
    if sum > 0.0 && sum.is_finite() {
        exp / sum
    } else {
        Array1::from_elem(logits.len(), 1.0 / logits.len().max(1) as f32)
    }
}

/// CLIP 风格打分: 归一化后的余弦相似度 × scale
pub fn clip_logits(image_embedding: ArrayView1<f32>, prompts: &PromptEncoding, scale: f32) -> Array1<f32> {
    let norm = |v: ArrayView1<f32>| v.dot(&v).sqrt().max(f32::EPSILON);
    let img_norm = norm(image_embedding);
    prompts
        .embeddings
        .axis_iter(Axis(0))
        .map(|row| scale * row.dot(&image_embedding) / (norm(row) * img_norm))
        .collect()
}

/// 提示词编码缓存, 键为排序后的提示词集合
#[derive(Default)]
pub struct PromptCache {
    entries: Mutex<HashMap<String, Arc<PromptEncoding>>>,
}

impl PromptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 命中则直接返回; 否则调用分类器编码 (不持锁) 后写入
    pub fn get_or_encode(
        &self,
        labels: &LabelSet,
        classifier: &dyn SemanticClassifier,
    ) -> anyhow::Result<Arc<PromptEncoding>> {
        let key = labels.cache_key();
        if let Some(hit) = self.entries.lock().get(&key) {
            return Ok(hit.clone());
        }

        let mut prompts = labels.sorted_prompts();
        prompts.push(SINK_PROMPT.to_string());
        let embeddings = classifier.encode_prompts(&prompts)?;
        anyhow::ensure!(
            embeddings.nrows() == prompts.len(),
            "classifier {} returned {} embeddings for {} prompts",
            classifier.name(),
            embeddings.nrows(),
            prompts.len()
        );
        debug!("🔤 编码 {} 个提示词 ({})", prompts.len(), classifier.name());

        let encoding = Arc::new(PromptEncoding { prompts, embeddings });
        self.entries.lock().insert(key, encoding.clone());
        Ok(encoding)
    }

    /// 使某个标签集合的缓存失效
    pub fn invalidate(&self, labels: &LabelSet) {
        self.entries.lock().remove(&labels.cache_key());
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
