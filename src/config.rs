//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HONEYPOT__*` 覆盖（双下划线表示嵌套，如 `HONEYPOT__CALLBACK__URL=...`）。
//! 置信度公式中的权重、阈值均为策略参数，全部在此暴露。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub session: SessionSection,
    pub confidence: ConfidenceSection,
    pub engagement: EngagementSection,
    pub callback: CallbackSection,
    pub classifier: ClassifierSection,
    pub responder: ResponderSection,
}

/// [server] 段：监听地址、API Key、未激活时的中性回复
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    /// 为空时服务端拒绝启动
    pub api_key: Option<String>,
    pub idle_reply: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            api_key: None,
            idle_reply: "I am not very sure what this means. Can you please explain?".to_string(),
        }
    }
}

/// [session] 段：过期时间、清理周期、对话记忆轮数
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// 对话记忆最多保留的发言条数（对方消息与本方回复各算一条）
    #[serde(default = "default_max_memory_turns")]
    pub max_memory_turns: usize,
}

fn default_max_age_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_max_memory_turns() -> usize {
    20
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_memory_turns: default_max_memory_turns(),
        }
    }
}

impl SessionSection {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// [confidence] 段：置信度更新策略
#[derive(Debug, Clone, Deserialize)]
pub struct ConfidenceSection {
    #[serde(default = "default_raw_weight")]
    pub raw_weight: f64,
    #[serde(default = "default_history_weight")]
    pub history_weight: f64,
    /// 每命中一类强指标（OTP / PIN / 礼品卡等）的加成
    #[serde(default = "default_boost_per_indicator")]
    pub boost_per_indicator: f64,
    #[serde(default = "default_max_boost")]
    pub max_boost: f64,
    /// raw 比当前置信度低出这么多且无关键词命中时视为负信号
    #[serde(default = "default_decay_margin")]
    pub decay_margin: f64,
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,
}

fn default_raw_weight() -> f64 {
    1.0
}

fn default_history_weight() -> f64 {
    0.25
}

fn default_boost_per_indicator() -> f64 {
    0.15
}

fn default_max_boost() -> f64 {
    0.3
}

fn default_decay_margin() -> f64 {
    0.4
}

fn default_decay_rate() -> f64 {
    0.05
}

impl Default for ConfidenceSection {
    fn default() -> Self {
        Self {
            raw_weight: default_raw_weight(),
            history_weight: default_history_weight(),
            boost_per_indicator: default_boost_per_indicator(),
            max_boost: default_max_boost(),
            decay_margin: default_decay_margin(),
            decay_rate: default_decay_rate(),
        }
    }
}

/// [engagement] 段：状态机阈值与降级参数
#[derive(Debug, Clone, Deserialize)]
pub struct EngagementSection {
    /// 只处理该角色发来的消息（大小写不敏感）
    #[serde(default = "default_counterparty_role")]
    pub counterparty_role: String,
    #[serde(default = "default_activation_threshold")]
    pub activation_threshold: f64,
    #[serde(default = "default_report_min_messages")]
    pub report_min_messages: u32,
    /// 回复生成器不可用时的兜底回复
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
    #[serde(default = "default_classifier_timeout_ms")]
    pub classifier_timeout_ms: u64,
    #[serde(default = "default_responder_timeout_ms")]
    pub responder_timeout_ms: u64,
    /// 10 位本地手机号补全的国家码
    #[serde(default = "default_country_code")]
    pub country_code: String,
}

fn default_counterparty_role() -> String {
    "scammer".to_string()
}

fn default_activation_threshold() -> f64 {
    0.6
}

fn default_report_min_messages() -> u32 {
    8
}

fn default_fallback_reply() -> String {
    "Sorry, I did not understand. Can you please tell me again what I need to do?".to_string()
}

fn default_classifier_timeout_ms() -> u64 {
    5_000
}

fn default_responder_timeout_ms() -> u64 {
    30_000
}

fn default_country_code() -> String {
    "91".to_string()
}

impl Default for EngagementSection {
    fn default() -> Self {
        Self {
            counterparty_role: default_counterparty_role(),
            activation_threshold: default_activation_threshold(),
            report_min_messages: default_report_min_messages(),
            fallback_reply: default_fallback_reply(),
            classifier_timeout_ms: default_classifier_timeout_ms(),
            responder_timeout_ms: default_responder_timeout_ms(),
            country_code: default_country_code(),
        }
    }
}

/// [callback] 段：上报端点与重试退避
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackSection {
    /// 未设置时回调只记录日志（不发网络请求）
    pub url: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// 单次 HTTP 请求超时（秒）
    #[serde(default = "default_callback_timeout_secs")]
    pub timeout_secs: u64,
    /// 关闭时等待在途投递完成的上限（秒）
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_callback_timeout_secs() -> u64 {
    10
}

fn default_drain_timeout_secs() -> u64 {
    15
}

impl Default for CallbackSection {
    fn default() -> Self {
        Self {
            url: None,
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_secs: default_callback_timeout_secs(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

/// [classifier] 段：远程打分服务（未设置则使用关键词分类器）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ClassifierSection {
    pub url: Option<String>,
}

/// [responder] 段：人设回复生成器
#[derive(Debug, Clone, Deserialize)]
pub struct ResponderSection {
    /// openai（OpenAI 兼容端点，含本地 Ollama）/ scripted
    #[serde(default = "default_responder_provider")]
    pub provider: String,
    pub base_url: Option<String>,
    #[serde(default = "default_responder_model")]
    pub model: String,
    pub api_key: Option<String>,
}

fn default_responder_provider() -> String {
    "openai".to_string()
}

fn default_responder_model() -> String {
    "llama3.2:3b-instruct-q4_K_M".to_string()
}

impl Default for ResponderSection {
    fn default() -> Self {
        Self {
            provider: default_responder_provider(),
            base_url: None,
            model: default_responder_model(),
            api_key: None,
        }
    }
}

/// 从 config 目录加载配置，环境变量 HONEYPOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HONEYPOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HONEYPOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_engagement_policy() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engagement.activation_threshold, 0.6);
        assert_eq!(cfg.engagement.report_min_messages, 8);
        assert_eq!(cfg.session.max_age_secs, 86_400);
        assert_eq!(cfg.session.max_memory_turns, 20);
        assert_eq!(cfg.callback.max_attempts, 3);
        assert_eq!(cfg.engagement.counterparty_role, "scammer");
    }

    #[test]
    fn test_load_config_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[engagement]
activation_threshold = 0.7

[callback]
url = "http://localhost:9999/report"
max_attempts = 5
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.engagement.activation_threshold, 0.7);
        assert_eq!(cfg.engagement.report_min_messages, 8);
        assert_eq!(cfg.callback.url.as_deref(), Some("http://localhost:9999/report"));
        assert_eq!(cfg.callback.max_attempts, 5);
        assert_eq!(cfg.callback.initial_backoff_ms, 1_000);
    }
}
