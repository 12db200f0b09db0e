//! 打分层：单条消息分类器与会话置信度跟踪

pub mod classifier;
pub mod confidence;

pub use classifier::{Classifier, KeywordClassifier, RemoteClassifier};
pub use confidence::{ConfidenceTracker, Signal};
