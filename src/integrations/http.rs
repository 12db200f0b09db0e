//! 蜜罐 HTTP 接入
//!
//! - `POST /honeypot/message`：x-api-key 鉴权，驱动一轮会话处理
//! - `GET /stats`：存储与回调统计（同样鉴权）
//! - `GET /`、`GET /health`：无鉴权

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::callback::DispatchStats;
use crate::core::{HoneypotError, InboundMessage, Orchestrator};
use crate::session::StoreStats;

pub const API_KEY_HEADER: &str = "x-api-key";

/// 服务状态
pub struct HoneypotState {
    pub orchestrator: Arc<Orchestrator>,
    pub api_key: String,
    /// 会话未激活时的中性回复
    pub idle_reply: String,
}

/// 请求中的单条消息
#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub sender: String,
    pub text: String,
    /// ISO 8601 字符串或毫秒时间戳
    #[serde(default)]
    pub timestamp: Option<Value>,
}

/// POST /honeypot/message 请求体
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub session_id: String,
    pub message: IncomingMessage,
    /// 会话记忆由服务端维护，调用方带来的历史只做记录
    #[serde(default)]
    pub conversation_history: Vec<Value>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct MessageResponse {
    pub status: String,
    pub reply: String,
}

impl MessageResponse {
    fn success(reply: String) -> Self {
        Self {
            status: "success".to_string(),
            reply,
        }
    }

    fn ignored() -> Self {
        Self {
            status: "ignored".to_string(),
            reply: String::new(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub sessions: StoreStats,
    pub callbacks: DispatchStats,
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, detail: impl Into<String>) -> ApiError {
    (status, Json(json!({ "detail": detail.into() })))
}

fn authorize(state: &HoneypotState, headers: &HeaderMap) -> Result<(), ApiError> {
    let provided = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    if provided.is_some_and(|key| keys_match(key, &state.api_key)) {
        Ok(())
    } else {
        Err(api_error(StatusCode::UNAUTHORIZED, "Invalid API key"))
    }
}

/// 比较摘要而非原文，耗时不随首个不同字节的位置变化
fn keys_match(provided: &str, expected: &str) -> bool {
    let provided = Sha256::digest(provided.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    provided
        .iter()
        .zip(expected.iter())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// 创建路由
pub fn create_router(state: Arc<HoneypotState>) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .route("/honeypot/message", post(receive_message))
        .route("/stats", get(stats))
        .with_state(state)
}

async fn banner() -> Json<Value> {
    Json(json!({
        "service": "honeypot",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["GET /health", "POST /honeypot/message", "GET /stats"],
    }))
}

/// POST /honeypot/message
async fn receive_message(
    State(state): State<Arc<HoneypotState>>,
    headers: HeaderMap,
    Json(request): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    authorize(&state, &headers)?;

    tracing::debug!(
        session_id = %request.session_id,
        history = request.conversation_history.len(),
        has_metadata = request.metadata.is_some(),
        "Honeypot message received"
    );

    let inbound = InboundMessage {
        sender: request.message.sender,
        text: request.message.text,
        timestamp: request.message.timestamp.as_ref().and_then(parse_timestamp),
    };

    match state
        .orchestrator
        .handle_message(&request.session_id, inbound)
        .await
    {
        Ok(outcome) => {
            let reply = outcome.reply.unwrap_or_else(|| state.idle_reply.clone());
            Ok(Json(MessageResponse::success(reply)))
        }
        Err(HoneypotError::InvalidSender(sender)) => {
            tracing::debug!(%sender, "Ignoring message from non-counterparty sender");
            Ok(Json(MessageResponse::ignored()))
        }
        Err(e @ HoneypotError::InvalidSessionId(_)) => {
            Err(api_error(StatusCode::BAD_REQUEST, e.to_string()))
        }
    }
}

/// GET /stats
async fn stats(
    State(state): State<Arc<HoneypotState>>,
    headers: HeaderMap,
) -> Result<Json<StatsResponse>, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(StatsResponse {
        sessions: state.orchestrator.store().stats().await,
        callbacks: state.orchestrator.dispatcher().stats(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::{CallbackDispatcher, LogReporter, RetryPolicy};
    use crate::responder::ScriptedResponder;
    use crate::session::SessionStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        let (dispatcher, _worker) =
            CallbackDispatcher::spawn(Arc::new(LogReporter), RetryPolicy::default());
        let orchestrator = Orchestrator::builder(Arc::new(SessionStore::default()), dispatcher)
            .with_responder(Arc::new(ScriptedResponder::new(["Which bank is this?"])))
            .build();
        create_router(Arc::new(HoneypotState {
            orchestrator: Arc::new(orchestrator),
            api_key: "secret".to_string(),
            idle_reply: "Sorry, who is this?".to_string(),
        }))
    }

    fn message(key: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/honeypot/message")
            .header("content-type", "application/json");
        if let Some(key) = key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_rejects_missing_or_wrong_key() {
        let body = json!({ "sessionId": "s1", "message": { "sender": "scammer", "text": "hi" } });
        let response = app().oneshot(message(None, body.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = app().oneshot(message(Some("nope"), body.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        // 等长但末位不同
        let response = app().oneshot(message(Some("secreT"), body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_keys_match_only_exact_key() {
        assert!(keys_match("secret", "secret"));
        assert!(!keys_match("secreT", "secret"));
        assert!(!keys_match("secret ", "secret"));
        assert!(!keys_match("secre", "secret"));
        assert!(!keys_match("", "secret"));
    }

    #[tokio::test]
    async fn test_activated_session_gets_persona_reply() {
        let body = json!({
            "sessionId": "s1",
            "message": {
                "sender": "scammer",
                "text": "Your account is blocked! Share OTP to verify.",
                "timestamp": "2026-01-01T10:00:00Z"
            },
            "conversationHistory": [],
            "metadata": { "channel": "SMS" }
        });
        let response = app().oneshot(message(Some("secret"), body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "success");
        assert_eq!(json["reply"], "Which bank is this?");
    }

    #[tokio::test]
    async fn test_unactivated_session_gets_idle_reply() {
        let body = json!({
            "sessionId": "s1",
            "message": { "sender": "scammer", "text": "hello" }
        });
        let response = app().oneshot(message(Some("secret"), body)).await.unwrap();
        let json = json_body(response).await;
        assert_eq!(json["status"], "success");
        assert_eq!(json["reply"], "Sorry, who is this?");
    }

    #[tokio::test]
    async fn test_non_counterparty_sender_is_ignored() {
        let body = json!({ "sessionId": "s1", "message": { "sender": "user", "text": "otp" } });
        let response = app().oneshot(message(Some("secret"), body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "ignored");
        assert_eq!(json["reply"], "");
    }

    #[tokio::test]
    async fn test_blank_session_id_is_bad_request() {
        let body = json!({ "sessionId": " ", "message": { "sender": "scammer", "text": "hi" } });
        let response = app().oneshot(message(Some("secret"), body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats_requires_key() {
        let request = Request::get("/stats")
            .header(API_KEY_HEADER, "secret")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["sessions"]["live"], 0);
        assert_eq!(json["callbacks"]["submitted"], 0);

        let response = app()
            .oneshot(Request::get("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_timestamp_formats() {
        assert!(parse_timestamp(&json!("2026-01-01T10:00:00Z")).is_some());
        assert!(parse_timestamp(&json!(1_767_261_600_000i64)).is_some());
        assert!(parse_timestamp(&json!("yesterday")).is_none());
    }
}
