//! 核心编排层：错误类型、会话状态机、引擎组装、过期清理、优雅关闭

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod shutdown;
pub mod sweeper;

pub use builder::{Engine, EngineBuilder};
pub use error::{CallbackError, CollaboratorError, DeliveryError, HoneypotError};
pub use orchestrator::{InboundMessage, Orchestrator, OrchestratorBuilder, TurnOutcome};
pub use shutdown::{
    run_with_graceful_shutdown, DispatcherDrain, ShutdownCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason, TaskJoin,
};
pub use sweeper::spawn_sweeper;
