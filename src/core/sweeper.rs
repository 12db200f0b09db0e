//! 过期会话清理器：按固定间隔扫描存储，token 取消后退出

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::session::SessionStore;

pub fn spawn_sweeper(
    store: Arc<SessionStore>,
    interval: Duration,
    max_age: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {
                    let removed = store.sweep_expired(Utc::now(), max_age).await;
                    if !removed.is_empty() {
                        tracing::info!("Cleaned up {} expired sessions", removed.len());
                        tracing::debug!(?removed, "Expired session ids");
                    }
                }
            }
        }
        tracing::debug!("Session sweeper stopped");
    })
}
