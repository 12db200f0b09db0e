//! 单条消息打分器
//!
//! `Classifier` 是对外部分类模型的窄接口；内置关键词分类器同时作为不可用时的兜底。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::CollaboratorError;
use crate::signals::KeywordSignals;

/// 分类器：纯函数式打分，返回 [0, 1]
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn score(&self, text: &str) -> Result<f64, CollaboratorError>;
}

/// 关键词分类器：强指标 0.9，两个以上可疑词 0.7，否则 0
#[derive(Debug, Default, Clone)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn score_signals(signals: &KeywordSignals) -> f64 {
        if signals.has_indicator() {
            0.9
        } else if signals.suspicious.len() >= 2 {
            0.7
        } else {
            0.0
        }
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn score(&self, text: &str) -> Result<f64, CollaboratorError> {
        Ok(Self::score_signals(&KeywordSignals::detect(text)))
    }
}

#[derive(Serialize)]
struct ScoreRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct ScoreResponse {
    score: f64,
}

/// 远程分类服务：POST {"text": ...}，响应 {"score": 0.87}
pub struct RemoteClassifier {
    client: Client,
    url: String,
}

impl RemoteClassifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Classifier for RemoteClassifier {
    async fn score(&self, text: &str) -> Result<f64, CollaboratorError> {
        let unavailable =
            |e: reqwest::Error| CollaboratorError::ClassifierUnavailable(e.to_string());
        let response = self
            .client
            .post(&self.url)
            .json(&ScoreRequest { text })
            .send()
            .await
            .map_err(unavailable)?
            .error_for_status()
            .map_err(unavailable)?;
        let body: ScoreResponse = response.json().await.map_err(unavailable)?;
        if !body.score.is_finite() {
            return Err(CollaboratorError::ClassifierUnavailable(format!(
                "non-finite score {}",
                body.score
            )));
        }
        Ok(body.score.clamp(0.0, 1.0))
    }
}
