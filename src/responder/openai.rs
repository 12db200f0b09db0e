//! OpenAI 兼容端点上的人设回复器
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url，含本地 Ollama 的 /v1）。
//! 系统提示词固定为"不太懂技术、谨慎的长者"人设。

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use super::Responder;
use crate::core::CollaboratorError;
use crate::memory::{Role, Turn};

pub const PERSONA_PROMPT: &str = "\
You are an older person who is not very good with technology. \
You are polite, cautious, and slightly worried. \
You believe you are talking to a bank or customer support representative.

Rules you must follow:
- NEVER say you think this is a scam
- NEVER say you are an AI
- NEVER accuse the other person
- Ask simple clarification questions
- Respond in clear, simple English
- Keep messages short and natural, as a single paragraph
- Do NOT use line breaks, bullet points, or lists
- Avoid repeating the same sentence structure across turns";

fn unavailable(e: impl std::fmt::Display) -> CollaboratorError {
    CollaboratorError::ResponderUnavailable(e.to_string())
}

/// 人设回复器：持有 Client 与 model 名，reply 时把记忆转成聊天消息并取首条 content
pub struct PersonaResponder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl PersonaResponder {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        // 本地 Ollama 不校验 key，但 SDK 需要一个值
        let api_key = api_key.unwrap_or("ollama").to_string();

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    fn to_openai_messages(
        memory: &[Turn],
        text: &str,
    ) -> Result<Vec<ChatCompletionRequestMessage>, CollaboratorError> {
        let mut messages = Vec::with_capacity(memory.len() + 2);
        messages.push(ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(PERSONA_PROMPT)
                .build()
                .map_err(unavailable)?,
        ));
        for turn in memory {
            let message = match turn.role {
                Role::Counterparty => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(turn.text.clone())
                        .build()
                        .map_err(unavailable)?,
                ),
                Role::Persona => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(turn.text.clone())
                        .build()
                        .map_err(unavailable)?,
                ),
            };
            messages.push(message);
        }
        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(text.to_string())
                .build()
                .map_err(unavailable)?,
        ));
        Ok(messages)
    }
}

/// 人设要求单段回复：折叠换行与多余空白
pub(crate) fn single_paragraph(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl Responder for PersonaResponder {
    async fn reply(&self, memory: &[Turn], text: &str) -> Result<String, CollaboratorError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(0.6)
            .messages(Self::to_openai_messages(memory, text)?)
            .build()
            .map_err(unavailable)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(unavailable)?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .map(|c| single_paragraph(&c))
            .unwrap_or_default();

        if content.is_empty() {
            return Err(unavailable("empty completion"));
        }
        Ok(content)
    }
}
