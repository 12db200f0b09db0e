//! Honeypot - 诈骗对话蜜罐的会话编排引擎
//!
//! 模块划分：
//! - **callback**: 上报载荷、投递端与带重试的后台分发器
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、会话状态机编排、过期清理、优雅关闭
//! - **intel**: 情报提取与规范化去重
//! - **memory**: 会话内对话记忆
//! - **observability**: 日志
//! - **responder**: 人设回复生成（OpenAI 兼容 / 脚本）
//! - **scoring**: 分类器与置信度累计
//! - **session**: 会话状态与并发安全的存储
//! - **signals**: 关键词信号
//! - **integrations**: HTTP 接入（feature = "server"）

pub mod callback;
pub mod config;
pub mod core;
pub mod intel;
#[cfg(feature = "server")]
pub mod integrations;
pub mod memory;
pub mod observability;
pub mod responder;
pub mod scoring;
pub mod session;
pub mod signals;

pub use crate::core::{InboundMessage, Orchestrator, TurnOutcome};
