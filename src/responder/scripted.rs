//! 脚本回复器（用于测试与离线运行，无需模型）
//!
//! 按顺序循环返回预设的人设台词。

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::Responder;
use crate::core::CollaboratorError;
use crate::memory::Turn;

const DEFAULT_LINES: &[&str] = &[
    "Oh dear, I did not know there was a problem. Which bank are you calling from?",
    "I am not very good with these phones. Where exactly should I send it?",
    "Can you give me your number so my son can call you back?",
    "Sorry, the screen is very small. Can you type the account details again?",
    "Is there an ID or UPI I should write down? I want to do it correctly.",
];

/// 循环返回预设台词
#[derive(Debug)]
pub struct ScriptedResponder {
    lines: Vec<String>,
    next: AtomicUsize,
}

impl ScriptedResponder {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            next: AtomicUsize::new(0),
        }
    }
}

impl Default for ScriptedResponder {
    fn default() -> Self {
        Self::new(DEFAULT_LINES.iter().copied())
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    async fn reply(&self, _memory: &[Turn], _text: &str) -> Result<String, CollaboratorError> {
        if self.lines.is_empty() {
            return Err(CollaboratorError::ResponderUnavailable(
                "no scripted lines".to_string(),
            ));
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.lines.len();
        Ok(self.lines[i].clone())
    }
}
