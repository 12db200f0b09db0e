//! 回调分发器：独立后台 worker + 每次投递一个重试状态机
//!
//! - `report` 只做移交（非阻塞），移交成功即视为"已发起"；投递失败从不回滚会话的 reported
//! - 临时错误按封顶指数退避重试，永久错误或次数耗尽时记 warn 并计入失败统计
//! - 每个在途投递持有会话租约，期间过期清理不会删除该会话

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use super::{CallbackPayload, Reporter};
use crate::config::CallbackSection;
use crate::core::CallbackError;
use crate::session::SessionLease;

/// 重试策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// 第 attempt 次失败后的等待：initial * 2^(attempt-1)，封顶 max_backoff
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&CallbackSection::default())
    }
}

impl From<&CallbackSection> for RetryPolicy {
    fn from(cfg: &CallbackSection) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            initial_backoff: Duration::from_millis(cfg.initial_backoff_ms),
            max_backoff: Duration::from_millis(cfg.max_backoff_ms),
        }
    }
}

/// 一次上报任务
pub struct DispatchJob {
    pub payload: CallbackPayload,
    /// 投递期间占住会话，防止被过期清理
    pub lease: Option<SessionLease>,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    attempts: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// 分发统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStats {
    pub submitted: u64,
    pub attempts: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl DispatchStats {
    pub fn in_flight(&self) -> u64 {
        self.submitted
            .saturating_sub(self.delivered)
            .saturating_sub(self.failed)
    }
}

/// 单次投递的状态
#[derive(Debug)]
enum DeliveryState {
    Attempt(u32),
    Backoff { attempt: u32, delay: Duration },
    Delivered { attempts: u32 },
    Failed { attempts: u32, reason: String },
}

/// 分发器句柄（可克隆，所有克隆共享同一个 worker）
#[derive(Clone)]
pub struct CallbackDispatcher {
    tx: mpsc::UnboundedSender<DispatchJob>,
    counters: Arc<Counters>,
    closed: CancellationToken,
}

impl CallbackDispatcher {
    /// 启动后台 worker；返回的 JoinHandle 在 close 后等待所有在途投递结束
    pub fn spawn(reporter: Arc<dyn Reporter>, policy: RetryPolicy) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let closed = CancellationToken::new();

        let worker = tokio::spawn(run_worker(
            rx,
            reporter,
            policy,
            Arc::clone(&counters),
            closed.clone(),
        ));

        (
            Self {
                tx,
                counters,
                closed,
            },
            worker,
        )
    }

    /// 移交一次上报；只在分发器已关闭时失败
    pub fn report(&self, job: DispatchJob) -> Result<(), CallbackError> {
        if self.closed.is_cancelled() {
            return Err(CallbackError::DispatcherClosed);
        }
        self.tx
            .send(job)
            .map_err(|_| CallbackError::DispatcherClosed)?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// 停止接收新任务；已移交的任务仍会投递完
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            attempts: self.counters.attempts.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<DispatchJob>,
    reporter: Arc<dyn Reporter>,
    policy: RetryPolicy,
    counters: Arc<Counters>,
    closed: CancellationToken,
) {
    let mut inflight = JoinSet::new();

    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => {
                    inflight.spawn(deliver(
                        job,
                        Arc::clone(&reporter),
                        policy.clone(),
                        Arc::clone(&counters),
                    ));
                }
                None => break,
            },
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!("Callback delivery task aborted: {}", e);
                }
            }
        }
    }

    // 已移交但尚未取出的任务同样要投递
    rx.close();
    while let Some(job) = rx.recv().await {
        inflight.spawn(deliver(job, Arc::clone(&reporter), policy.clone(), Arc::clone(&counters)));
    }
    tracing::info!("Callback dispatcher closing, draining {} delivery(ies)", inflight.len());
    while let Some(joined) = inflight.join_next().await {
        if let Err(e) = joined {
            tracing::error!("Callback delivery task aborted: {}", e);
        }
    }
}

async fn deliver(
    job: DispatchJob,
    reporter: Arc<dyn Reporter>,
    policy: RetryPolicy,
    counters: Arc<Counters>,
) -> Result<u32, CallbackError> {
    let DispatchJob { payload, lease } = job;
    let delivery_id = uuid::Uuid::new_v4();
    let session_id = payload.session_id.as_str();
    let mut state = DeliveryState::Attempt(1);

    let outcome = loop {
        state = match state {
            DeliveryState::Attempt(attempt) => {
                counters.attempts.fetch_add(1, Ordering::Relaxed);
                match reporter.deliver(&payload).await {
                    Ok(()) => DeliveryState::Delivered { attempts: attempt },
                    Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                        let delay = policy.backoff_for(attempt);
                        tracing::warn!(
                            %delivery_id,
                            session_id,
                            attempt,
                            "Callback attempt failed ({}), retrying in {:?}",
                            e,
                            delay
                        );
                        DeliveryState::Backoff { attempt, delay }
                    }
                    Err(e) => DeliveryState::Failed {
                        attempts: attempt,
                        reason: e.to_string(),
                    },
                }
            }
            DeliveryState::Backoff { attempt, delay } => {
                tokio::time::sleep(delay).await;
                DeliveryState::Attempt(attempt + 1)
            }
            DeliveryState::Delivered { attempts } => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::info!(%delivery_id, session_id, attempts, "Callback delivered");
                break Ok(attempts);
            }
            DeliveryState::Failed { attempts, reason } => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    %delivery_id,
                    session_id,
                    attempts,
                    "Callback delivery failed: {}",
                    reason
                );
                break Err(CallbackError::DeliveryFailed { attempts, reason });
            }
        };
    };

    drop(lease);
    outcome
}
