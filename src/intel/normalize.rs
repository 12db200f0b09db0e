//! 情报规范化与合并
//!
//! 每种类型先规范化再按 (kind, value) 去重；校验失败的候选静默丢弃，只计数并打 debug 日志。

use url::Url;

use super::{Artifact, ArtifactKind, ArtifactSet, Candidate};

/// 单次合并结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

/// 链接中需要剥离的跟踪参数
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid", "ref_src", "igshid"];

const EDGE_PUNCTUATION: &[char] = &[
    '.', ',', ';', ':', '!', '?', ')', '(', ']', '[', '"', '\'', '<', '>',
];

/// 规范化器；国家码用于补全 10 位本地手机号
#[derive(Debug, Clone)]
pub struct Normalizer {
    country_code: String,
}

impl Normalizer {
    pub fn new(country_code: impl Into<String>) -> Self {
        let country_code: String = country_code
            .into()
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        Self { country_code }
    }

    /// 把候选合并进情报集合；同一候选合并两次结果不变
    pub fn merge<I>(&self, artifacts: &mut ArtifactSet, candidates: I) -> MergeOutcome
    where
        I: IntoIterator<Item = Candidate>,
    {
        let mut outcome = MergeOutcome::default();
        for candidate in candidates {
            match self.normalize(&candidate) {
                Some(artifact) => {
                    if artifacts.insert(artifact) {
                        outcome.added += 1;
                    } else {
                        outcome.duplicates += 1;
                    }
                }
                None => {
                    tracing::debug!(
                        kind = ?candidate.kind,
                        raw = %candidate.raw,
                        "Dropped malformed candidate"
                    );
                    outcome.rejected += 1;
                }
            }
        }
        outcome
    }

    pub fn normalize(&self, candidate: &Candidate) -> Option<Artifact> {
        let value = match candidate.kind {
            ArtifactKind::Phone => self.normalize_phone(&candidate.raw),
            ArtifactKind::Upi => normalize_upi(&candidate.raw),
            ArtifactKind::BankAccount => normalize_bank_account(&candidate.raw),
            ArtifactKind::Url => normalize_url(&candidate.raw),
        }?;
        Some(Artifact {
            kind: candidate.kind,
            value,
        })
    }

    fn normalize_phone(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.chars().any(|c| c.is_alphabetic()) {
            return None;
        }
        let explicit_plus = trimmed.starts_with('+');
        let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
        let cc = self.country_code.as_str();
        let with_cc = !cc.is_empty() && digits.len() == 10 + cc.len() && digits.starts_with(cc);

        let national = if with_cc {
            &digits[cc.len()..]
        } else if explicit_plus {
            return (11..=15).contains(&digits.len()).then(|| format!("+{digits}"));
        } else if digits.len() == 10 {
            digits.as_str()
        } else if digits.len() == 11 && digits.starts_with('0') {
            &digits[1..]
        } else {
            return None;
        };

        let mobile_prefix_ok = cc != "91" || national.starts_with(['6', '7', '8', '9']);
        mobile_prefix_ok.then(|| format!("+{cc}{national}"))
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new("91")
    }
}

fn normalize_upi(raw: &str) -> Option<String> {
    let value = raw.trim().trim_matches(EDGE_PUNCTUATION).to_lowercase();
    let (handle, provider) = value.split_once('@')?;
    let handle_ok = handle.len() >= 2
        && handle
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    let provider_ok = provider.len() >= 2 && provider.chars().all(|c| c.is_ascii_lowercase());
    (handle_ok && provider_ok).then_some(value)
}

fn normalize_bank_account(raw: &str) -> Option<String> {
    let value: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let ok = (9..=18).contains(&value.len()) && value.chars().all(|c| c.is_ascii_digit());
    ok.then_some(value)
}

fn normalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim().trim_end_matches(EDGE_PUNCTUATION)).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.to_ascii_lowercase();
            !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    Some(url.into())
}
