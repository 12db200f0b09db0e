//! 单个会话的状态
//!
//! 一个会话对应与一位对方的一段对话，由外部提供的不透明 ID 标识。

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::intel::{Artifact, ArtifactSet};
use crate::memory::ConversationMemory;

/// 会话 ID（外部提供，每段对话唯一）
pub type SessionId = String;

/// 状态机阶段（由字段推导，不单独存储）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStage {
    New,
    Scored,
    Activated,
    Reported,
}

/// 单个会话
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    /// [0, 1]
    pub confidence: f64,
    pub message_count: u32,
    /// 一旦为 true 永不回退
    pub activated: bool,
    pub artifacts: ArtifactSet,
    /// 出现过的可疑关键词（仅用于上报备注）
    pub suspicious_keywords: BTreeSet<String>,
    /// 回调已移交；之后不再上报
    pub reported: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub reported_at: Option<DateTime<Utc>>,
    pub memory: ConversationMemory,
    /// 校验失败被丢弃的提取候选数
    pub rejected_candidates: u32,
}

impl Session {
    pub fn new(id: SessionId, max_memory_turns: usize) -> Self {
        let now = Utc::now();
        Self {
            id,
            confidence: 0.0,
            message_count: 0,
            activated: false,
            artifacts: ArtifactSet::new(),
            suspicious_keywords: BTreeSet::new(),
            reported: false,
            created_at: now,
            last_activity_at: now,
            activated_at: None,
            reported_at: None,
            memory: ConversationMemory::new(max_memory_turns),
            rejected_candidates: 0,
        }
    }

    pub fn stage(&self) -> SessionStage {
        if self.reported {
            SessionStage::Reported
        } else if self.activated {
            SessionStage::Activated
        } else if self.message_count > 0 {
            SessionStage::Scored
        } else {
            SessionStage::New
        }
    }

    /// 是否超过 max_age 未活动（严格大于）
    pub fn is_expired(&self, now: DateTime<Utc>, max_age: std::time::Duration) -> bool {
        (now - self.last_activity_at)
            .to_std()
            .map(|idle| idle > max_age)
            .unwrap_or(false)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            stage: self.stage(),
            confidence: self.confidence,
            message_count: self.message_count,
            activated: self.activated,
            reported: self.reported,
            artifacts: self.artifacts.iter().cloned().collect(),
            suspicious_keywords: self.suspicious_keywords.iter().cloned().collect(),
            rejected_candidates: self.rejected_candidates,
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
            activated_at: self.activated_at,
            reported_at: self.reported_at,
        }
    }
}

/// 会话快照（返回给调用方 / 观测接口）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub stage: SessionStage,
    pub confidence: f64,
    pub message_count: u32,
    pub activated: bool,
    pub reported: bool,
    pub artifacts: Vec<Artifact>,
    pub suspicious_keywords: Vec<String>,
    pub rejected_candidates: u32,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub reported_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_stage_progression() {
        let mut s = Session::new("abc".into(), 20);
        assert_eq!(s.stage(), SessionStage::New);
        s.message_count = 1;
        assert_eq!(s.stage(), SessionStage::Scored);
        s.activated = true;
        assert_eq!(s.stage(), SessionStage::Activated);
        s.reported = true;
        assert_eq!(s.stage(), SessionStage::Reported);
    }

    #[test]
    fn test_expiry_is_strict() {
        let s = Session::new("abc".into(), 20);
        let day = Duration::from_secs(86_400);
        let at = s.last_activity_at;
        assert!(!s.is_expired(at + chrono::Duration::seconds(86_400), day));
        assert!(s.is_expired(at + chrono::Duration::seconds(86_401), day));
        // 时钟回拨不算过期
        assert!(!s.is_expired(at - chrono::Duration::seconds(10), day));
    }
}
