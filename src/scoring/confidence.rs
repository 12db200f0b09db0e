//! 置信度跟踪
//!
//! 正信号下单调不减；只有"分类器给出明显更低的分数且没有任何强指标"时才按固定步长缓慢衰减，
//! 永不骤降为 0。激活判定不在这里做，由编排器统一处理。

use crate::config::ConfidenceSection;
use crate::session::Session;
use crate::signals::KeywordSignals;

/// 单条消息对置信度的输入
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signal {
    /// 分类器分数，[0, 1]
    pub raw_score: f64,
    /// 关键词加成（已按上限截断）
    pub keyword_boost: f64,
    /// 分类器不可用、使用了关键词兜底分数；此时不触发衰减
    pub degraded: bool,
}

/// 置信度策略（来自 [confidence] 配置段）
#[derive(Debug, Clone)]
pub struct ConfidenceTracker {
    policy: ConfidenceSection,
}

impl ConfidenceTracker {
    pub fn new(policy: ConfidenceSection) -> Self {
        Self { policy }
    }

    /// 每类强指标加成一次，总额不超过 max_boost
    pub fn keyword_boost(&self, signals: &KeywordSignals) -> f64 {
        let raw = self.policy.boost_per_indicator * signals.indicators.len() as f64;
        raw.clamp(0.0, self.policy.max_boost.max(0.0))
    }

    pub fn signal(&self, raw_score: f64, signals: &KeywordSignals, degraded: bool) -> Signal {
        Signal {
            raw_score: sanitize(raw_score),
            keyword_boost: self.keyword_boost(signals),
            degraded,
        }
    }

    /// 纯函数：根据上一值与本条信号计算新置信度
    pub fn next_confidence(&self, previous: f64, signal: Signal) -> f64 {
        let previous = sanitize(previous);
        let raw = sanitize(signal.raw_score);
        let boost = signal.keyword_boost.max(0.0);

        let negative = !signal.degraded
            && boost == 0.0
            && previous - raw >= self.policy.decay_margin;
        if negative {
            return (previous - self.policy.decay_rate.max(0.0)).max(0.0);
        }

        let weighted = self.policy.raw_weight * raw + self.policy.history_weight * previous;
        (previous.max(weighted) + boost).clamp(0.0, 1.0)
    }

    /// 原地更新会话置信度并返回新值
    pub fn update(&self, session: &mut Session, signal: Signal) -> f64 {
        let next = self.next_confidence(session.confidence, signal);
        session.confidence = next;
        next
    }
}

impl Default for ConfidenceTracker {
    fn default() -> Self {
        Self::new(ConfidenceSection::default())
    }
}

fn sanitize(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}
