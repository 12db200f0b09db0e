//! 错误类型
//!
//! 分三层：调用方错误（同步返回、不改动会话）、协作方降级（本地兜底、从不导致整轮失败）、
//! 回调投递错误（由 Dispatcher 内部重试并记录日志，不回传给触发请求）。

use thiserror::Error;

/// 调用方错误：校验失败时直接返回，会话状态保持不变
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HoneypotError {
    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    #[error("Invalid sender: {0:?} is not the counterparty role")]
    InvalidSender(String),
}

/// 外部协作方不可用（分类器 / 回复生成器），编排器据此走降级路径
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("Classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    #[error("Responder unavailable: {0}")]
    ResponderUnavailable(String),
}

/// 单次回调投递失败的分类：决定重试还是放弃
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// 网络错误、超时、5xx、429
    #[error("Transient delivery failure: {0}")]
    Transient(String),

    /// 其余 4xx、请求无法构造等
    #[error("Permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }
}

/// 回调移交失败（仅在 Dispatcher 已关闭时出现）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallbackError {
    #[error("Callback dispatcher is closed")]
    DispatcherClosed,

    #[error("Callback delivery failed after {attempts} attempt(s): {reason}")]
    DeliveryFailed { attempts: u32, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_error_classification() {
        assert!(DeliveryError::Transient("503".into()).is_transient());
        assert!(!DeliveryError::Permanent("404".into()).is_transient());
    }

    #[test]
    fn test_error_messages_carry_offending_value() {
        let err = HoneypotError::InvalidSender("user".into());
        assert!(err.to_string().contains("\"user\""));
        let err = CallbackError::DeliveryFailed {
            attempts: 3,
            reason: "timeout".into(),
        };
        assert_eq!(
            err.to_string(),
            "Callback delivery failed after 3 attempt(s): timeout"
        );
    }
}
