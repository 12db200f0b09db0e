//! 单条消息的情报提取（印度地区号段与 UPI 格式）
//!
//! 只负责"尽力找出候选"，校验交给 Normalizer；没有匹配时返回空列表，从不失败。

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use super::{ArtifactKind, Candidate};

/// 提取器接口：纯函数、尽力而为
pub trait Extractor: Send + Sync {
    fn extract(&self, text: &str) -> Vec<Candidate>;
}

struct Patterns {
    phone: Regex,
    bank_account: Regex,
    upi: Regex,
    url: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static CELL: OnceLock<Option<Patterns>> = OnceLock::new();
    CELL.get_or_init(|| {
        Some(Patterns {
            phone: Regex::new(
                r"\+91[\-\s]?[6-9]\d{4}[\-\s]?\d{5}\b|\b0?[6-9]\d{4}[\-\s]?\d{5}\b",
            )
            .ok()?,
            bank_account: Regex::new(r"\b\d{9,18}\b").ok()?,
            // 第二个分组命中说明是邮箱（provider 后还有域名后缀）
            upi: Regex::new(r"\b([a-zA-Z0-9._\-]{2,}@[a-zA-Z]{2,})(\.[a-zA-Z]{2,})?").ok()?,
            url: Regex::new(r#"https?://[^\s"'<>]+"#).ok()?,
        })
    })
    .as_ref()
}

fn digits_of(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// 基于正则的默认提取器
#[derive(Debug, Default, Clone)]
pub struct RegexExtractor;

impl Extractor for RegexExtractor {
    fn extract(&self, text: &str) -> Vec<Candidate> {
        let Some(p) = patterns() else {
            tracing::error!("Extraction patterns failed to compile");
            return Vec::new();
        };

        let mut out = Vec::new();

        let phones: Vec<&str> = p.phone.find_iter(text).map(|m| m.as_str()).collect();
        let mut phone_digits = HashSet::new();
        for phone in &phones {
            let d = digits_of(phone);
            if d.len() > 10 {
                phone_digits.insert(d[d.len() - 10..].to_string());
            }
            phone_digits.insert(d);
        }

        // 同一串数字既像手机号又像账号时只算手机号
        for m in p.bank_account.find_iter(text) {
            if !phone_digits.contains(m.as_str()) {
                out.push(Candidate::new(ArtifactKind::BankAccount, m.as_str()));
            }
        }

        out.extend(phones.into_iter().map(|s| Candidate::new(ArtifactKind::Phone, s)));

        for caps in p.upi.captures_iter(text) {
            if caps.get(2).is_some() {
                continue;
            }
            if let Some(handle) = caps.get(1) {
                out.push(Candidate::new(ArtifactKind::Upi, handle.as_str()));
            }
        }

        out.extend(
            p.url
                .find_iter(text)
                .map(|m| Candidate::new(ArtifactKind::Url, m.as_str())),
        );

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str, kind: ArtifactKind) -> Vec<String> {
        RegexExtractor
            .extract(text)
            .into_iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.raw)
            .collect()
    }

    #[test]
    fn test_extracts_all_kinds() {
        let text = "Pay to refund.desk@ybl or call +91 98765 43210. \
                    Account 123456789012 IFSC SBIN0001234. \
                    Visit https://kyc-verify.example/login now";
        assert_eq!(kinds(text, ArtifactKind::Upi), vec!["refund.desk@ybl"]);
        assert_eq!(kinds(text, ArtifactKind::Phone), vec!["+91 98765 43210"]);
        assert_eq!(kinds(text, ArtifactKind::BankAccount), vec!["123456789012"]);
        assert_eq!(
            kinds(text, ArtifactKind::Url),
            vec!["https://kyc-verify.example/login"]
        );
    }

    #[test]
    fn test_phone_is_not_double_counted_as_account() {
        let text = "my number is 9876543210 and also +919812345678";
        assert!(kinds(text, ArtifactKind::BankAccount).is_empty());
        assert_eq!(kinds(text, ArtifactKind::Phone).len(), 2);
    }

    #[test]
    fn test_email_is_not_a_upi_handle() {
        assert!(kinds("write to support@gmail.com", ArtifactKind::Upi).is_empty());
    }

    #[test]
    fn test_no_matches_returns_empty() {
        assert!(RegexExtractor.extract("hello, is this the bank?").is_empty());
    }
}
