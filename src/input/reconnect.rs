// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 重连管理: 窗口内最多重试 N 次, 用尽后判定不可用

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    /// 重试用尽后的冷却窗口 (从最后一次尝试算起)
    pub window: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            window: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectDecision {
    Attempt,
    /// 不可用, 至少等待 `retry_after` 后才会重试
    Refuse { retry_after: Duration },
}

/// 单路摄像头的重连状态
#[derive(Clone, Debug, Default)]
pub struct ReconnectState {
    attempts: u32,
    last_attempt: Option<Instant>,
}

impl ReconnectState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否允许现在尝试连接; 冷却窗口已过则清零计数
    pub fn check(&mut self, now: Instant, policy: &ReconnectPolicy) -> ReconnectDecision {
        if self.attempts < policy.max_attempts {
            return ReconnectDecision::Attempt;
        }
        match self.last_attempt {
            Some(last) if now.saturating_duration_since(last) < policy.window => {
                ReconnectDecision::Refuse {
                    retry_after: policy.window - now.saturating_duration_since(last),
                }
            }
            _ => {
                self.attempts = 0;
                ReconnectDecision::Attempt
            }
        }
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.attempts += 1;
        self.last_attempt = Some(now);
    }

    pub fn record_success(&mut self) {
        self.attempts = 0;
    }

    /// 手动重新探测: 给一个全新的重试额度
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_attempt = None;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn exhausted(&self, policy: &ReconnectPolicy) -> bool {
        self.attempts >= policy.max_attempts
    }
}
