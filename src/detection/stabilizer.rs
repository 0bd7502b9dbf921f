// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 标签稳定器: 最近 N 个标签多数投票 + 连续一致次数迟滞

use std::collections::VecDeque;

#[derive(Clone, Debug)]
pub struct LabelStabilizer {
    history: VecDeque<String>,
    capacity: usize,
    required: u32,
    candidate: String,
    agreement: u32,
    stable: String,
}

impl LabelStabilizer {
    /// 以首个检测标签初始化, 可见标签立即等于它
    pub fn new(initial: &str, capacity: usize, required: u32) -> Self {
        let capacity = capacity.max(1);
        let mut history = VecDeque::with_capacity(capacity);
        history.push_back(initial.to_string());
        Self {
            history,
            capacity,
            required: required.max(1),
            candidate: initial.to_string(),
            agreement: 0,
            stable: initial.to_string(),
        }
    }

    /// 记录一次匹配到的标签, 返回当前可见标签
    pub fn observe(&mut self, label: &str) -> &str {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(label.to_string());

        let majority = self.majority().to_string();
        if majority == self.candidate {
            self.agreement += 1;
        } else {
            self.candidate = majority;
            self.agreement = 1;
        }

        if self.agreement >= self.required {
            self.stable = self.candidate.clone();
        }
        &self.stable
    }

    /// 多数标签, 票数相同时取历史中最先出现者
    pub fn majority(&self) -> &str {
        let mut best: Option<(&str, usize)> = None;
        for (i, label) in self.history.iter().enumerate() {
            // 只在首次出现处计票
            if self.history.iter().take(i).any(|l| l == label) {
                continue;
            }
            let count = self.history.iter().filter(|l| *l == label).count();
            match best {
                Some((_, c)) if c >= count => {}
                _ => best = Some((label.as_str(), count)),
            }
        }
        best.map(|(l, _)| l).unwrap_or(self.stable.as_str())
    }

    pub fn stable(&self) -> &str {
        &self.stable
    }

    pub fn candidate(&self) -> &str {
        &self.candidate
    }

    pub fn agreement(&self) -> u32 {
        self.agreement
    }

    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }
}
