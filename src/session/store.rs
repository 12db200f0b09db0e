//! 会话存储
//!
//! ID → 会话 的映射只在查找 / 插入 / 删除时持有结构锁；每个会话有自己的公平互斥锁，
//! 同一会话的消息按到达顺序串行处理，不同会话互不阻塞。
//!
//! 过期清理只删除"无人持有"的会话：除映射自身外还有任何句柄存活（处理中、回调在途）都会跳过。

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::state::{Session, SessionId, SessionSummary};
use crate::core::HoneypotError;

const MAX_SESSION_ID_LEN: usize = 128;

/// 会话句柄（共享所有权，内部带锁）
#[derive(Clone)]
pub struct SessionHandle(Arc<Mutex<Session>>);

/// 会话租约：只占住会话不被清理，不提供访问
#[derive(Clone)]
pub struct SessionLease(#[allow(dead_code)] SessionHandle);

/// 独占访问某个会话；drop 即释放
pub struct SessionGuard {
    handle: SessionHandle,
    guard: OwnedMutexGuard<Session>,
}

impl SessionGuard {
    /// 为在途的后台任务（回调）领取租约
    pub fn lease(&self) -> SessionLease {
        SessionLease(self.handle.clone())
    }
}

impl Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.guard
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.guard
    }
}

/// 存储统计快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub live: usize,
    /// 正在处理或被回调占用
    pub busy: usize,
    pub activated: usize,
    pub reported: usize,
    pub created_total: u64,
    pub expired_total: u64,
}

pub fn validate_session_id(session_id: &str) -> Result<(), HoneypotError> {
    let malformed = session_id.trim().is_empty()
        || session_id.len() > MAX_SESSION_ID_LEN
        || session_id.chars().any(char::is_control);
    if malformed {
        return Err(HoneypotError::InvalidSessionId(session_id.to_string()));
    }
    Ok(())
}

/// 会话存储（内存，进程内）
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    max_memory_turns: usize,
    live: AtomicUsize,
    created_total: AtomicU64,
    expired_total: AtomicU64,
}

impl SessionStore {
    pub fn new(max_memory_turns: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_memory_turns,
            live: AtomicUsize::new(0),
            created_total: AtomicU64::new(0),
            expired_total: AtomicU64::new(0),
        }
    }

    /// 获取或创建会话；并发下同一 ID 至多创建一次
    pub async fn get_or_create(&self, session_id: &str) -> Result<SessionHandle, HoneypotError> {
        validate_session_id(session_id)?;

        if let Some(handle) = self.sessions.read().await.get(session_id) {
            return Ok(handle.clone());
        }

        let mut sessions = self.sessions.write().await;
        let handle = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                self.live.fetch_add(1, Ordering::Relaxed);
                self.created_total.fetch_add(1, Ordering::Relaxed);
                tracing::info!(session_id, "Session created");
                SessionHandle(Arc::new(Mutex::new(Session::new(
                    session_id.to_string(),
                    self.max_memory_turns,
                ))))
            })
            .clone();
        Ok(handle)
    }

    /// 取得会话独占访问；同一会话的调用按到达顺序排队
    pub async fn lock(&self, session_id: &str) -> Result<SessionGuard, HoneypotError> {
        let handle = self.get_or_create(session_id).await?;
        let guard = Arc::clone(&handle.0).lock_owned().await;
        Ok(SessionGuard { handle, guard })
    }

    /// 在独占访问下执行同步修改
    pub async fn with_session<F, R>(&self, session_id: &str, f: F) -> Result<R, HoneypotError>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut guard = self.lock(session_id).await?;
        Ok(f(&mut guard))
    }

    /// 只读快照；会话不存在时不创建
    pub async fn snapshot(&self, session_id: &str) -> Option<SessionSummary> {
        let handle = self.sessions.read().await.get(session_id).cloned()?;
        let session = handle.0.lock().await;
        Some(session.summary())
    }

    /// 删除超过 max_age 未活动、且当前无人持有的会话，返回被删除的 ID
    pub async fn sweep_expired(&self, now: DateTime<Utc>, max_age: Duration) -> Vec<SessionId> {
        let mut sessions = self.sessions.write().await;
        let mut removed = Vec::new();

        sessions.retain(|id, handle| {
            // 结构写锁下不会有新的克隆产生，引用计数为 1 即无人持有
            if Arc::strong_count(&handle.0) > 1 {
                return true;
            }
            let expired = match handle.0.try_lock() {
                Ok(session) => session.is_expired(now, max_age),
                Err(_) => false,
            };
            if expired {
                removed.push(id.clone());
            }
            !expired
        });

        if !removed.is_empty() {
            self.live.fetch_sub(removed.len(), Ordering::Relaxed);
            self.expired_total
                .fetch_add(removed.len() as u64, Ordering::Relaxed);
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub async fn stats(&self) -> StoreStats {
        let sessions = self.sessions.read().await;
        let mut stats = StoreStats {
            live: sessions.len(),
            created_total: self.created_total.load(Ordering::Relaxed),
            expired_total: self.expired_total.load(Ordering::Relaxed),
            ..StoreStats::default()
        };
        for handle in sessions.values() {
            match handle.0.try_lock() {
                Ok(session) if Arc::strong_count(&handle.0) == 1 => {
                    stats.activated += usize::from(session.activated);
                    stats.reported += usize::from(session.reported);
                }
                _ => stats.busy += 1,
            }
        }
        stats
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(20)
    }
}
