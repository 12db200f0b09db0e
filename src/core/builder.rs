//! 引擎组装：根据配置选择协作方实现，启动回调分发器与过期清理器
//!
//! 控制台与 HTTP 服务共用这一套组装逻辑。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::callback::{CallbackDispatcher, HttpReporter, LogReporter, Reporter, RetryPolicy};
use crate::config::AppConfig;
use crate::core::{spawn_sweeper, DispatcherDrain, Orchestrator, TaskJoin};
use crate::responder::{create_responder_from_config, Responder};
use crate::scoring::{Classifier, KeywordClassifier, RemoteClassifier};
use crate::session::SessionStore;

/// 组装完成的引擎及其后台任务
pub struct Engine {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<SessionStore>,
    dispatcher_worker: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl Engine {
    /// 拆出关闭时需要执行的清理：先停清理器，再排空回调
    pub fn into_cleanups(self) -> (TaskJoin, DispatcherDrain) {
        let dispatcher = self.orchestrator.dispatcher().clone();
        (
            TaskJoin::new("SessionSweeper", self.sweeper),
            DispatcherDrain::new(dispatcher, self.dispatcher_worker),
        )
    }
}

/// 引擎构建器；未显式指定的协作方按配置创建
pub struct EngineBuilder {
    config: AppConfig,
    classifier: Option<Arc<dyn Classifier>>,
    responder: Option<Arc<dyn Responder>>,
    reporter: Option<Arc<dyn Reporter>>,
}

impl EngineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            classifier: None,
            responder: None,
            reporter: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_responder(mut self, responder: Arc<dyn Responder>) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    fn classifier_from_config(&self) -> anyhow::Result<Arc<dyn Classifier>> {
        match self.config.classifier.url.as_deref() {
            Some(url) => {
                let timeout = Duration::from_millis(self.config.engagement.classifier_timeout_ms);
                let remote = RemoteClassifier::new(url, timeout)
                    .context("Failed to build classifier client")?;
                tracing::info!("Using remote classifier at {}", url);
                Ok(Arc::new(remote))
            }
            None => {
                tracing::info!("No classifier url configured, using keyword classifier");
                Ok(Arc::new(KeywordClassifier))
            }
        }
    }

    fn reporter_from_config(&self) -> anyhow::Result<Arc<dyn Reporter>> {
        match self.config.callback.url.as_deref() {
            Some(url) => {
                let timeout = Duration::from_secs(self.config.callback.timeout_secs);
                let reporter =
                    HttpReporter::new(url, timeout).context("Failed to build callback client")?;
                tracing::info!("Callbacks will be delivered to {}", url);
                Ok(Arc::new(reporter))
            }
            None => {
                tracing::warn!("No callback url configured, callbacks are only logged");
                Ok(Arc::new(LogReporter))
            }
        }
    }

    /// 启动后台任务并返回引擎；需在 tokio 运行时内调用
    pub fn build(self, shutdown: CancellationToken) -> anyhow::Result<Engine> {
        let classifier = match &self.classifier {
            Some(c) => Arc::clone(c),
            None => self.classifier_from_config()?,
        };
        let reporter = match &self.reporter {
            Some(r) => Arc::clone(r),
            None => self.reporter_from_config()?,
        };
        let responder = match &self.responder {
            Some(r) => Arc::clone(r),
            None => create_responder_from_config(&self.config.responder),
        };

        let store = Arc::new(SessionStore::new(self.config.session.max_memory_turns));
        let (dispatcher, dispatcher_worker) =
            CallbackDispatcher::spawn(reporter, RetryPolicy::from(&self.config.callback));
        let sweeper = spawn_sweeper(
            Arc::clone(&store),
            self.config.session.sweep_interval(),
            self.config.session.max_age(),
            shutdown,
        );

        let orchestrator = Orchestrator::builder(Arc::clone(&store), dispatcher)
            .with_classifier(classifier)
            .with_responder(responder)
            .with_config(self.config)
            .build();

        Ok(Engine {
            orchestrator: Arc::new(orchestrator),
            store,
            dispatcher_worker,
            sweeper,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{InboundMessage, ShutdownCoordinator, ShutdownManager};
    use crate::responder::ScriptedResponder;

    #[tokio::test]
    async fn test_engine_runs_and_shuts_down() {
        let manager = Arc::new(ShutdownManager::new());
        let engine = EngineBuilder::new(AppConfig::default())
            .with_responder(Arc::new(ScriptedResponder::new(["Which bank?"])))
            .build(manager.token())
            .unwrap();

        let out = engine
            .orchestrator
            .handle_message("console", InboundMessage::new("Scammer", "Share the OTP now"))
            .await
            .unwrap();
        assert_eq!(out.reply.as_deref(), Some("Which bank?"));
        assert_eq!(engine.store.count(), 1);

        let (sweeper, drain) = engine.into_cleanups();
        let mut coordinator = ShutdownCoordinator::new(Arc::clone(&manager));
        coordinator.register(sweeper);
        coordinator.register(drain);
        manager.shutdown(crate::core::ShutdownReason::UserInitiated);
        coordinator.run_cleanup().await;
    }
}
