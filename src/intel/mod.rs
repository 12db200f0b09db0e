//! 情报层：提取候选、规范化与去重
//!
//! - **extract**: 单条消息的正则提取（外部协作方的默认实现）
//! - **normalize**: 候选规范化并合并进会话的情报集合

pub mod extract;
pub mod normalize;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub use extract::{Extractor, RegexExtractor};
pub use normalize::{MergeOutcome, Normalizer};

/// 情报类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactKind {
    Upi,
    Phone,
    BankAccount,
    Url,
}

impl ArtifactKind {
    /// 核心类型才满足上报条件（单独的链接不够）
    pub fn is_core(&self) -> bool {
        !matches!(self, ArtifactKind::Url)
    }
}

/// 提取器产出的原始候选
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub kind: ArtifactKind,
    pub raw: String,
}

impl Candidate {
    pub fn new(kind: ArtifactKind, raw: impl Into<String>) -> Self {
        Self {
            kind,
            raw: raw.into(),
        }
    }
}

/// 规范化后的情报项；(kind, value) 即去重键
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub value: String,
}

/// 会话累积的情报集合，只增不减
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    items: BTreeSet<Artifact>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已存在时返回 false
    pub(crate) fn insert(&mut self, artifact: Artifact) -> bool {
        self.items.insert(artifact)
    }

    pub fn has_core(&self) -> bool {
        self.items.iter().any(|a| a.kind.is_core())
    }

    pub fn of_kind(&self, kind: ArtifactKind) -> impl Iterator<Item = &str> + '_ {
        self.items
            .iter()
            .filter(move |a| a.kind == kind)
            .map(|a| a.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> + '_ {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
