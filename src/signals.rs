//! 关键词信号：强指标（索要 OTP / PIN / 礼品卡等）与一般可疑词
//!
//! 强指标按"类别"计数，同一类别的多个写法只算一次（如 "upi pin" 与 "pin"）。

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

/// 强指标类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Indicator {
    Otp,
    Pin,
    GiftCard,
    Cvv,
    RemoteAccess,
}

impl Indicator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Indicator::Otp => "otp",
            Indicator::Pin => "pin",
            Indicator::GiftCard => "gift card",
            Indicator::Cvv => "cvv",
            Indicator::RemoteAccess => "remote access app",
        }
    }
}

const INDICATOR_PATTERNS: &[(Indicator, &str)] = &[
    (Indicator::Otp, r"\b(otp|one[\s-]time[\s-]password)\b"),
    (Indicator::Pin, r"\b(upi\s*pin|m?pin)\b"),
    (Indicator::GiftCard, r"\bgift\s*cards?\b"),
    (Indicator::Cvv, r"\b(cvv|cvc)\b"),
    (Indicator::RemoteAccess, r"\b(anydesk|teamviewer|quick\s*support)\b"),
];

/// 一般可疑词（不带加成，仅用于关键词分类器与上报备注）
pub const SUSPICIOUS_KEYWORDS: &[&str] = &[
    "urgent",
    "verify",
    "account",
    "blocked",
    "suspended",
    "kyc",
    "refund",
    "debit",
    "credit",
    "bank",
    "upi",
    "money",
    "crypto",
    "bitcoin",
    "lottery",
    "prize",
];

fn indicator_regexes() -> &'static [(Indicator, Regex)] {
    static CELL: OnceLock<Vec<(Indicator, Regex)>> = OnceLock::new();
    CELL.get_or_init(|| {
        INDICATOR_PATTERNS
            .iter()
            .filter_map(|(ind, pat)| Regex::new(pat).ok().map(|re| (*ind, re)))
            .collect()
    })
}

/// 单条消息的关键词信号
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordSignals {
    pub indicators: BTreeSet<Indicator>,
    pub suspicious: BTreeSet<&'static str>,
}

impl KeywordSignals {
    pub fn detect(text: &str) -> Self {
        let lower = text.to_lowercase();
        let indicators = indicator_regexes()
            .iter()
            .filter(|(_, re)| re.is_match(&lower))
            .map(|(ind, _)| *ind)
            .collect();
        let suspicious = SUSPICIOUS_KEYWORDS
            .iter()
            .copied()
            .filter(|kw| lower.contains(kw))
            .collect();
        Self {
            indicators,
            suspicious,
        }
    }

    pub fn has_indicator(&self) -> bool {
        !self.indicators.is_empty()
    }

    /// 可疑词与强指标的合并名称，写入会话记录
    pub fn keyword_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.indicators
            .iter()
            .map(|i| i.as_str())
            .chain(self.suspicious.iter().copied())
    }
}
