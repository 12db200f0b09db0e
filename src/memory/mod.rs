//! 记忆层：会话内短期对话记忆（不跨进程持久化）

pub mod conversation;

pub use conversation::{ConversationMemory, Role, Turn};
