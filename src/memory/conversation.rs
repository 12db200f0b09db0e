//! 对话记忆：会话内的有界轮次历史
//!
//! 最多保留 N 条发言，超出时成对丢弃最旧的往来；仅供回复生成器使用。

use serde::{Deserialize, Serialize};

/// 发言角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// 对方（疑似诈骗者）
    Counterparty,
    /// 本方人设回复
    Persona,
}

/// 单条发言
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn counterparty(text: impl Into<String>) -> Self {
        Self {
            role: Role::Counterparty,
            text: text.into(),
        }
    }

    pub fn persona(text: impl Into<String>) -> Self {
        Self {
            role: Role::Persona,
            text: text.into(),
        }
    }
}

/// 有界对话记忆，发言条数不超过 max_turns
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    turns: Vec<Turn>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns: max_turns.max(2),
        }
    }

    /// 记录一次完整往来
    pub fn push_exchange(&mut self, inbound: impl Into<String>, reply: impl Into<String>) {
        self.turns.push(Turn::counterparty(inbound));
        self.turns.push(Turn::persona(reply));
        self.prune();
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    fn prune(&mut self) {
        if self.turns.len() <= self.max_turns {
            return;
        }
        // 按往来成对丢弃，保证首条始终是对方发言
        let mut excess = self.turns.len() - self.max_turns;
        if excess % 2 == 1 {
            excess += 1;
        }
        self.turns.drain(..excess);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_keeps_order() {
        let mut memory = ConversationMemory::new(5);
        memory.push_exchange("hello sir", "who is this?");
        assert_eq!(
            memory.turns(),
            &[Turn::counterparty("hello sir"), Turn::persona("who is this?")]
        );
    }

    #[test]
    fn test_prune_drops_oldest_turns() {
        let mut memory = ConversationMemory::new(4);
        for i in 0..5 {
            memory.push_exchange(format!("in {i}"), format!("out {i}"));
        }
        assert_eq!(memory.len(), 4);
        assert_eq!(memory.turns()[0], Turn::counterparty("in 3"));
        assert_eq!(memory.turns()[3], Turn::persona("out 4"));
    }

    #[test]
    fn test_cap_counts_individual_turns() {
        let mut memory = ConversationMemory::new(20);
        for i in 0..30 {
            memory.push_exchange(format!("in {i}"), format!("out {i}"));
        }
        assert_eq!(memory.len(), 20);
        assert_eq!(memory.turns()[0], Turn::counterparty("in 20"));
    }

    #[test]
    fn test_odd_cap_keeps_whole_exchanges() {
        let mut memory = ConversationMemory::new(5);
        for i in 0..4 {
            memory.push_exchange(format!("in {i}"), format!("out {i}"));
        }
        assert_eq!(memory.len(), 4);
        assert_eq!(memory.turns()[0].role, Role::Counterparty);
        assert_eq!(memory.turns()[0].text, "in 2");
    }
}
