//! 回调上报：载荷、投递端与后台分发器
//!
//! 上报条件满足时由编排器移交给 Dispatcher，之后的重试、退避全部在后台完成，不影响对话请求。

pub mod dispatcher;

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::core::DeliveryError;
use crate::intel::{Artifact, ArtifactKind};
use crate::session::{Session, SessionId};

pub use dispatcher::{CallbackDispatcher, DispatchJob, DispatchStats, RetryPolicy};

/// 分类汇总的情报（上报端约定的字段名）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedIntelligence {
    pub bank_accounts: Vec<String>,
    pub upi_ids: Vec<String>,
    pub phishing_links: Vec<String>,
    pub phone_numbers: Vec<String>,
    pub suspicious_keywords: Vec<String>,
}

/// 回调载荷
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub session_id: SessionId,
    pub scam_detected: bool,
    pub confidence: f64,
    pub message_count: u32,
    pub artifacts: Vec<Artifact>,
    pub extracted_intelligence: ExtractedIntelligence,
    pub agent_notes: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub reported_at: DateTime<Utc>,
}

impl CallbackPayload {
    pub fn from_session(session: &Session, reported_at: DateTime<Utc>) -> Self {
        let collect = |kind: ArtifactKind| -> Vec<String> {
            session.artifacts.of_kind(kind).map(String::from).collect()
        };
        Self {
            session_id: session.id.clone(),
            scam_detected: true,
            confidence: session.confidence,
            message_count: session.message_count,
            artifacts: session.artifacts.iter().cloned().collect(),
            extracted_intelligence: ExtractedIntelligence {
                bank_accounts: collect(ArtifactKind::BankAccount),
                upi_ids: collect(ArtifactKind::Upi),
                phishing_links: collect(ArtifactKind::Url),
                phone_numbers: collect(ArtifactKind::Phone),
                suspicious_keywords: session.suspicious_keywords.iter().cloned().collect(),
            },
            agent_notes: agent_notes(&session.suspicious_keywords),
            first_seen_at: session.created_at,
            last_activity_at: session.last_activity_at,
            reported_at,
        }
    }
}

const TACTICS: &[(&str, &[&str])] = &[
    ("urgency", &["urgent"]),
    ("account-threat", &["blocked", "suspended", "kyc", "verify"]),
    ("credential harvesting (OTP/PIN/CVV)", &["otp", "pin", "cvv"]),
    ("payment redirection", &["upi", "refund", "money", "gift card", "debit", "credit", "bank"]),
    ("remote-access", &["remote access app"]),
    ("prize or investment lure", &["lottery", "prize", "crypto", "bitcoin"]),
];

/// 根据会话中出现过的关键词概括对方手法
pub fn agent_notes(keywords: &BTreeSet<String>) -> String {
    let tactics: Vec<&str> = TACTICS
        .iter()
        .filter(|(_, words)| words.iter().any(|w| keywords.contains(*w)))
        .map(|(name, _)| *name)
        .collect();
    if tactics.is_empty() {
        return "Counterparty showed scam indicators; see extracted intelligence.".to_string();
    }
    format!(
        "Counterparty used {} tactics to solicit sensitive details.",
        tactics.join(", ")
    )
}

/// 投递端：一次投递尝试
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn deliver(&self, payload: &CallbackPayload) -> Result<(), DeliveryError>;
}

/// HTTP 投递：POST JSON，2xx 视为成功
pub struct HttpReporter {
    client: Client,
    url: String,
}

impl HttpReporter {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

fn classify_status(status: StatusCode) -> Result<(), DeliveryError> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        Err(DeliveryError::Transient(format!("endpoint returned {status}")))
    } else {
        Err(DeliveryError::Permanent(format!("endpoint returned {status}")))
    }
}

#[async_trait]
impl Reporter for HttpReporter {
    async fn deliver(&self, payload: &CallbackPayload) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    DeliveryError::Permanent(e.to_string())
                } else {
                    DeliveryError::Transient(e.to_string())
                }
            })?;
        classify_status(response.status())
    }
}

/// 未配置回调地址时使用：只记录日志
#[derive(Debug, Default)]
pub struct LogReporter;

#[async_trait]
impl Reporter for LogReporter {
    async fn deliver(&self, payload: &CallbackPayload) -> Result<(), DeliveryError> {
        let body = serde_json::to_string(payload)
            .map_err(|e| DeliveryError::Permanent(e.to_string()))?;
        tracing::info!(session_id = %payload.session_id, "Callback (log only): {}", body);
        Ok(())
    }
}
