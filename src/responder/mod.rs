//! 回复生成层：人设回复器抽象与实现（OpenAI 兼容 / 脚本）
//!
//! 回复的自然语言质量不在引擎职责内；引擎只关心"拿到一段回复或失败后兜底"。

pub mod openai;
pub mod scripted;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ResponderSection;
use crate::core::CollaboratorError;
use crate::memory::Turn;

pub use openai::{PersonaResponder, PERSONA_PROMPT};
pub use scripted::ScriptedResponder;

/// 回复生成器：根据有界对话记忆与当前消息生成一段回复
#[async_trait]
pub trait Responder: Send + Sync {
    async fn reply(&self, memory: &[Turn], text: &str) -> Result<String, CollaboratorError>;
}

/// 根据配置选择回复器（openai 兼容端点 / scripted）
pub fn create_responder_from_config(cfg: &ResponderSection) -> Arc<dyn Responder> {
    match cfg.provider.to_lowercase().as_str() {
        "scripted" | "mock" => {
            tracing::info!("Using scripted responder");
            Arc::new(ScriptedResponder::default())
        }
        provider => {
            if provider != "openai" {
                tracing::warn!(
                    "Unknown responder provider '{}', using OpenAI-compatible",
                    provider
                );
            }
            let api_key = cfg
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
            tracing::info!(
                "Using persona responder ({} @ {})",
                cfg.model,
                cfg.base_url.as_deref().unwrap_or("default endpoint")
            );
            Arc::new(PersonaResponder::new(
                cfg.base_url.as_deref(),
                &cfg.model,
                api_key.as_deref(),
            ))
        }
    }
}
