//! 编排器：每条入站消息驱动一次会话状态机
//!
//! NEW → SCORED →（ACTIVATED）→ REPORTED。REPORTED 只对上报终态，会话之后仍继续接收消息。
//!
//! 一轮处理分两段：
//! 1. 持会话锁做所有可能耗时的外部调用（分类、生成回复），只读快照，不改状态；
//! 2. 一次性同步提交全部修改（置信度、计数、激活、记忆、情报、上报）。
//!
//! 因此调用方中途放弃（超时、断开）时会话保持本轮之前的完整状态。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::callback::{CallbackDispatcher, CallbackPayload, DispatchJob};
use crate::config::{AppConfig, EngagementSection};
use crate::core::{CollaboratorError, HoneypotError};
use crate::intel::{Extractor, Normalizer, RegexExtractor};
use crate::responder::{Responder, ScriptedResponder};
use crate::scoring::{Classifier, ConfidenceTracker, KeywordClassifier};
use crate::session::{validate_session_id, SessionGuard, SessionStore, SessionSummary};
use crate::signals::KeywordSignals;

/// 入站消息
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub sender: String,
    pub text: String,
    /// 对方消息时间（仅记录；活动时间以处理时刻为准）
    pub timestamp: Option<DateTime<Utc>>,
}

impl InboundMessage {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp: None,
        }
    }
}

/// 一轮处理的结果
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// 未激活时为 None（由接入层决定如何回应）
    pub reply: Option<String>,
    pub summary: SessionSummary,
    /// 本轮触发了回调移交
    pub reported_now: bool,
    /// 本轮走了降级路径的协作方
    pub degraded: Vec<CollaboratorError>,
}

/// 会话编排器
pub struct Orchestrator {
    store: Arc<SessionStore>,
    classifier: Arc<dyn Classifier>,
    responder: Arc<dyn Responder>,
    extractor: Arc<dyn Extractor>,
    dispatcher: CallbackDispatcher,
    tracker: ConfidenceTracker,
    normalizer: Normalizer,
    policy: EngagementSection,
}

impl Orchestrator {
    pub fn builder(
        store: Arc<SessionStore>,
        dispatcher: CallbackDispatcher,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder::new(store, dispatcher)
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &CallbackDispatcher {
        &self.dispatcher
    }

    /// 处理一条入站消息
    pub async fn handle_message(
        &self,
        session_id: &str,
        message: InboundMessage,
    ) -> Result<TurnOutcome, HoneypotError> {
        validate_session_id(session_id)?;
        if !message
            .sender
            .trim()
            .eq_ignore_ascii_case(&self.policy.counterparty_role)
        {
            return Err(HoneypotError::InvalidSender(message.sender));
        }
        tracing::debug!(session_id, timestamp = ?message.timestamp, "Inbound message");

        let mut session = self.store.lock(session_id).await?;
        let text = message.text;
        let keywords = KeywordSignals::detect(&text);
        let mut degraded = Vec::new();

        // 阶段一：外部调用，只读
        let (raw_score, classifier_degraded) = match self.score(&text).await {
            Ok(score) => (score, false),
            Err(e) => {
                tracing::warn!(session_id, "{}; falling back to keyword scoring", e);
                degraded.push(e);
                (KeywordClassifier::score_signals(&keywords), true)
            }
        };
        let signal = self.tracker.signal(raw_score, &keywords, classifier_degraded);
        let confidence = self.tracker.next_confidence(session.confidence, signal);
        let activate_now =
            !session.activated && confidence >= self.policy.activation_threshold;

        let reply = if session.activated || activate_now {
            match self.generate_reply(&session, &text).await {
                Ok(reply) => Some(reply),
                Err(e) => {
                    tracing::warn!(session_id, "{}; using fallback reply", e);
                    degraded.push(e);
                    Some(self.policy.fallback_reply.clone())
                }
            }
        } else {
            None
        };

        let candidates = self.extractor.extract(&text);

        // 阶段二：同步提交，此后不再 await
        let now = Utc::now();
        self.tracker.update(&mut session, signal);
        session.message_count += 1;
        session.last_activity_at = now;

        if activate_now {
            session.activated = true;
            session.activated_at = Some(now);
            tracing::info!(session_id, confidence, "Session activated");
        }

        if let Some(reply) = &reply {
            session.memory.push_exchange(text, reply.clone());
        }

        session
            .suspicious_keywords
            .extend(keywords.keyword_names().map(String::from));
        let merged = self.normalizer.merge(&mut session.artifacts, candidates);
        session.rejected_candidates = session
            .rejected_candidates
            .saturating_add(u32::try_from(merged.rejected).unwrap_or(u32::MAX));
        if merged.added > 0 {
            tracing::info!(
                session_id,
                added = merged.added,
                total = session.artifacts.len(),
                "New intelligence extracted"
            );
        }

        let reported_now = self.maybe_report(&mut session, now);

        Ok(TurnOutcome {
            reply,
            summary: session.summary(),
            reported_now,
            degraded,
        })
    }

    async fn score(&self, text: &str) -> Result<f64, CollaboratorError> {
        let limit = Duration::from_millis(self.policy.classifier_timeout_ms);
        tokio::time::timeout(limit, self.classifier.score(text))
            .await
            .map_err(|_| {
                CollaboratorError::ClassifierUnavailable(format!("timed out after {:?}", limit))
            })?
    }

    async fn generate_reply(
        &self,
        session: &SessionGuard,
        text: &str,
    ) -> Result<String, CollaboratorError> {
        let limit = Duration::from_millis(self.policy.responder_timeout_ms);
        let reply = tokio::time::timeout(limit, self.responder.reply(session.memory.turns(), text))
            .await
            .map_err(|_| {
                CollaboratorError::ResponderUnavailable(format!("timed out after {:?}", limit))
            })??;
        if reply.trim().is_empty() {
            return Err(CollaboratorError::ResponderUnavailable(
                "empty reply".to_string(),
            ));
        }
        Ok(reply)
    }

    /// 上报条件：消息数达标、至少一条核心情报、尚未上报。移交成功即置 reported。
    fn maybe_report(&self, session: &mut SessionGuard, now: DateTime<Utc>) -> bool {
        let due = !session.reported
            && session.message_count >= self.policy.report_min_messages
            && session.artifacts.has_core();
        if !due {
            return false;
        }

        let job = DispatchJob {
            payload: CallbackPayload::from_session(session, now),
            lease: Some(session.lease()),
        };
        match self.dispatcher.report(job) {
            Ok(()) => {
                session.reported = true;
                session.reported_at = Some(now);
                tracing::info!(
                    session_id = %session.id,
                    messages = session.message_count,
                    artifacts = session.artifacts.len(),
                    "Reporting condition met, callback dispatched"
                );
                true
            }
            Err(e) => {
                // 未移交则保持未上报，下一条消息会再次尝试
                tracing::warn!(session_id = %session.id, "Callback handoff failed: {}", e);
                false
            }
        }
    }
}

/// 编排器构建器：默认使用关键词分类器、正则提取器与脚本回复器
pub struct OrchestratorBuilder {
    store: Arc<SessionStore>,
    dispatcher: CallbackDispatcher,
    classifier: Arc<dyn Classifier>,
    responder: Arc<dyn Responder>,
    extractor: Arc<dyn Extractor>,
    config: AppConfig,
}

impl OrchestratorBuilder {
    pub fn new(store: Arc<SessionStore>, dispatcher: CallbackDispatcher) -> Self {
        Self {
            store,
            dispatcher,
            classifier: Arc::new(KeywordClassifier),
            responder: Arc::new(ScriptedResponder::default()),
            extractor: Arc::new(RegexExtractor),
            config: AppConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_responder(mut self, responder: Arc<dyn Responder>) -> Self {
        self.responder = responder;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator {
            store: self.store,
            classifier: self.classifier,
            responder: self.responder,
            extractor: self.extractor,
            dispatcher: self.dispatcher,
            tracker: ConfidenceTracker::new(self.config.confidence.clone()),
            normalizer: Normalizer::new(self.config.engagement.country_code.clone()),
            policy: self.config.engagement,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::{Reporter, RetryPolicy};
    use crate::core::DeliveryError;
    use crate::session::SessionStage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedClassifier(f64);

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn score(&self, _text: &str) -> Result<f64, CollaboratorError> {
            Ok(self.0)
        }
    }

    struct DownClassifier;

    #[async_trait]
    impl Classifier for DownClassifier {
        async fn score(&self, _text: &str) -> Result<f64, CollaboratorError> {
            Err(CollaboratorError::ClassifierUnavailable("model offline".into()))
        }
    }

    struct DownResponder;

    #[async_trait]
    impl Responder for DownResponder {
        async fn reply(
            &self,
            _memory: &[crate::memory::Turn],
            _text: &str,
        ) -> Result<String, CollaboratorError> {
            Err(CollaboratorError::ResponderUnavailable("connection refused".into()))
        }
    }

    struct SlowClassifier;

    #[async_trait]
    impl Classifier for SlowClassifier {
        async fn score(&self, _text: &str) -> Result<f64, CollaboratorError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1.0)
        }
    }

    struct SlowResponder;

    #[async_trait]
    impl Responder for SlowResponder {
        async fn reply(
            &self,
            _memory: &[crate::memory::Turn],
            _text: &str,
        ) -> Result<String, CollaboratorError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".into())
        }
    }

    #[derive(Default)]
    struct CountingReporter(AtomicUsize);

    #[async_trait]
    impl Reporter for CountingReporter {
        async fn deliver(&self, _p: &CallbackPayload) -> Result<(), DeliveryError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn orchestrator(classifier: Arc<dyn Classifier>) -> (Orchestrator, Arc<CountingReporter>) {
        let reporter = Arc::new(CountingReporter::default());
        let (dispatcher, _worker) =
            CallbackDispatcher::spawn(reporter.clone(), RetryPolicy::default());
        let orch = Orchestrator::builder(Arc::new(SessionStore::default()), dispatcher)
            .with_classifier(classifier)
            .build();
        (orch, reporter)
    }

    fn scammer(text: &str) -> InboundMessage {
        InboundMessage::new("scammer", text)
    }

    fn short_timeouts() -> AppConfig {
        let mut config = AppConfig::default();
        config.engagement.classifier_timeout_ms = 50;
        config.engagement.responder_timeout_ms = 50;
        config
    }

    #[tokio::test]
    async fn test_otp_message_activates_on_first_message() {
        let (orch, _) = orchestrator(Arc::new(FixedClassifier(0.5)));
        let out = orch
            .handle_message("s1", scammer("Your account is blocked! Share OTP to verify."))
            .await
            .unwrap();
        assert!(out.summary.confidence >= 0.649);
        assert!(out.summary.activated);
        assert_eq!(out.summary.stage, SessionStage::Activated);
        assert!(out.reply.is_some());
        assert_eq!(out.summary.message_count, 1);
    }

    #[tokio::test]
    async fn test_low_score_stays_silent() {
        let (orch, _) = orchestrator(Arc::new(FixedClassifier(0.1)));
        let out = orch.handle_message("s1", scammer("hello, who is this?")).await.unwrap();
        assert!(out.reply.is_none());
        assert_eq!(out.summary.stage, SessionStage::Scored);
        let memory_len = orch.store().with_session("s1", |s| s.memory.len()).await.unwrap();
        assert_eq!(memory_len, 0);
    }

    #[tokio::test]
    async fn test_invalid_sender_does_not_touch_state() {
        let (orch, _) = orchestrator(Arc::new(FixedClassifier(0.9)));
        let err = orch
            .handle_message("s1", InboundMessage::new("user", "share otp"))
            .await
            .unwrap_err();
        assert_eq!(err, HoneypotError::InvalidSender("user".into()));
        assert_eq!(orch.store().count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_session_id_is_rejected() {
        let (orch, _) = orchestrator(Arc::new(FixedClassifier(0.9)));
        let err = orch.handle_message("  ", scammer("hi")).await.unwrap_err();
        assert!(matches!(err, HoneypotError::InvalidSessionId(_)));
    }

    #[tokio::test]
    async fn test_classifier_outage_falls_back_to_keywords() {
        let (orch, _) = orchestrator(Arc::new(DownClassifier));
        let out = orch
            .handle_message("s1", scammer("urgent, send OTP now"))
            .await
            .unwrap();
        assert_eq!(out.degraded.len(), 1);
        // 关键词兜底 0.9 + OTP 加成
        assert!(out.summary.activated);
    }

    #[tokio::test]
    async fn test_responder_outage_uses_fallback_reply() {
        let reporter = Arc::new(CountingReporter::default());
        let (dispatcher, _worker) = CallbackDispatcher::spawn(reporter, RetryPolicy::default());
        let orch = Orchestrator::builder(Arc::new(SessionStore::default()), dispatcher)
            .with_classifier(Arc::new(FixedClassifier(0.95)))
            .with_responder(Arc::new(DownResponder))
            .build();
        let out = orch.handle_message("s1", scammer("pay now")).await.unwrap();
        assert_eq!(
            out.reply.as_deref(),
            Some(EngagementSection::default().fallback_reply.as_str())
        );
        assert!(matches!(
            out.degraded.as_slice(),
            [CollaboratorError::ResponderUnavailable(_)]
        ));
    }

    #[tokio::test]
    async fn test_reports_exactly_once() {
        let (orch, reporter) = orchestrator(Arc::new(FixedClassifier(0.7)));
        let mut reported_turns = Vec::new();
        for i in 1..=10 {
            let text = if i == 3 {
                "send money to helpdesk.refund@ybl".to_string()
            } else {
                format!("message {i}, please hurry")
            };
            let out = orch.handle_message("s1", scammer(&text)).await.unwrap();
            if out.reported_now {
                reported_turns.push(i);
            }
        }
        assert_eq!(reported_turns, vec![8]);
        assert_eq!(orch.dispatcher().stats().submitted, 1);

        orch.dispatcher().close();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(reporter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_url_only_never_reports() {
        let (orch, _) = orchestrator(Arc::new(FixedClassifier(0.9)));
        for _ in 0..9 {
            let out = orch
                .handle_message("s1", scammer("login at https://kyc-update.example/now"))
                .await
                .unwrap();
            assert!(!out.reported_now);
        }
        assert_eq!(orch.dispatcher().stats().submitted, 0);
    }

    #[tokio::test]
    async fn test_cancelled_turn_leaves_session_untouched() {
        let (orch, _) = orchestrator(Arc::new(SlowClassifier));
        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            orch.handle_message("s1", scammer("otp 9876543210")),
        )
        .await;
        assert!(abandoned.is_err());

        let summary = orch.store().snapshot("s1").await.unwrap();
        assert_eq!(summary.message_count, 0);
        assert_eq!(summary.confidence, 0.0);
        assert!(summary.artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_closed_dispatcher_keeps_session_unreported() {
        let (orch, reporter) = orchestrator(Arc::new(FixedClassifier(0.9)));
        orch.handle_message("s1", scammer("pay to helpdesk@ybl")).await.unwrap();
        for i in 2..=7 {
            orch.handle_message("s1", scammer(&format!("hurry {i}"))).await.unwrap();
        }
        orch.dispatcher().close();

        for _ in 0..2 {
            let out = orch.handle_message("s1", scammer("hurry")).await.unwrap();
            assert!(!out.reported_now);
            assert!(!out.summary.reported);
            assert!(out.summary.reported_at.is_none());
            assert_ne!(out.summary.stage, SessionStage::Reported);
        }
        assert_eq!(orch.dispatcher().stats().submitted, 0);
        assert_eq!(reporter.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_slow_classifier_times_out_and_degrades() {
        let reporter = Arc::new(CountingReporter::default());
        let (dispatcher, _worker) = CallbackDispatcher::spawn(reporter, RetryPolicy::default());
        let orch = Orchestrator::builder(Arc::new(SessionStore::default()), dispatcher)
            .with_config(short_timeouts())
            .with_classifier(Arc::new(SlowClassifier))
            .build();

        let out = tokio::time::timeout(
            Duration::from_secs(2),
            orch.handle_message("s1", scammer("urgent, send OTP now")),
        )
        .await
        .expect("classifier timeout must bound the turn")
        .unwrap();
        assert!(matches!(
            out.degraded.as_slice(),
            [CollaboratorError::ClassifierUnavailable(msg)] if msg.contains("timed out")
        ));
        assert!(out.summary.activated);
        assert_eq!(out.summary.message_count, 1);
    }

    #[tokio::test]
    async fn test_slow_responder_times_out_to_fallback_reply() {
        let reporter = Arc::new(CountingReporter::default());
        let (dispatcher, _worker) = CallbackDispatcher::spawn(reporter, RetryPolicy::default());
        let config = short_timeouts();
        let fallback = config.engagement.fallback_reply.clone();
        let orch = Orchestrator::builder(Arc::new(SessionStore::default()), dispatcher)
            .with_config(config)
            .with_classifier(Arc::new(FixedClassifier(0.95)))
            .with_responder(Arc::new(SlowResponder))
            .build();

        let out = tokio::time::timeout(
            Duration::from_secs(2),
            orch.handle_message("s1", scammer("pay now")),
        )
        .await
        .expect("responder timeout must bound the turn")
        .unwrap();
        assert_eq!(out.reply.as_deref(), Some(fallback.as_str()));
        assert!(matches!(
            out.degraded.as_slice(),
            [CollaboratorError::ResponderUnavailable(msg)] if msg.contains("timed out")
        ));
        let memory = orch
            .store()
            .with_session("s1", |s| s.memory.turns().to_vec())
            .await
            .unwrap();
        assert_eq!(memory.len(), 2);
        assert_eq!(memory[1].text, fallback);
    }

    #[tokio::test]
    async fn test_memory_is_capped_at_default_turn_limit() {
        let (orch, _) = orchestrator(Arc::new(FixedClassifier(0.9)));
        for i in 0..30 {
            let out = orch
                .handle_message("s1", scammer(&format!("message {i}")))
                .await
                .unwrap();
            assert!(out.reply.is_some());
        }
        let memory = orch
            .store()
            .with_session("s1", |s| s.memory.turns().to_vec())
            .await
            .unwrap();
        assert_eq!(memory.len(), 20);
        assert_eq!(memory[0].text, "message 20");
    }
}
