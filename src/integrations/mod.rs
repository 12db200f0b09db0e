//! 外部接入：HTTP API（feature = "server"）

pub mod http;

pub use http::{create_router, HoneypotState};
