//! 会话层：会话状态与按会话加锁的内存存储

mod state;
mod store;

pub use state::{Session, SessionId, SessionStage, SessionSummary};
pub use store::{
    validate_session_id, SessionGuard, SessionHandle, SessionLease, SessionStore, StoreStats,
};
