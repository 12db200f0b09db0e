//! Honeypot HTTP 服务
//!
//! 配置见 config/default.toml，可用环境变量覆盖：
//! - HONEYPOT__SERVER__API_KEY: 接口鉴权密钥（必填）
//! - HONEYPOT__CALLBACK__URL: 回调上报地址（不填则只记日志）
//! - HONEYPOT__CLASSIFIER__URL: 远程分类服务（不填则用关键词分类）
//! - HONEYPOT__RESPONDER__BASE_URL / MODEL: OpenAI 兼容端点
//!
//! 启动: cargo run --bin honeypot-server --features server

#[cfg(feature = "server")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Context;
    use honeypot::config::load_config;
    use honeypot::core::{
        run_with_graceful_shutdown, EngineBuilder, ShutdownCoordinator, ShutdownManager,
        ShutdownReason,
    };
    use honeypot::integrations::{create_router, HoneypotState};

    honeypot::observability::init();

    let config = load_config(std::env::args().nth(1).map(Into::into))
        .context("Failed to load configuration")?;
    let api_key = config
        .server
        .api_key
        .clone()
        .filter(|k| !k.is_empty())
        .context("server.api_key must be set (HONEYPOT__SERVER__API_KEY)")?;
    let bind = config.server.bind.clone();
    let idle_reply = config.server.idle_reply.clone();
    let drain_timeout = Duration::from_secs(config.callback.drain_timeout_secs);

    let manager = Arc::new(ShutdownManager::new());
    let engine = EngineBuilder::new(config).build(manager.token())?;

    let state = Arc::new(HoneypotState {
        orchestrator: Arc::clone(&engine.orchestrator),
        api_key,
        idle_reply,
    });
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    tracing::info!("Honeypot server listening on http://{}", bind);

    let (sweeper, drain) = engine.into_cleanups();
    let mut coordinator =
        ShutdownCoordinator::new(Arc::clone(&manager)).with_timeout(drain_timeout);
    coordinator.register(sweeper);
    coordinator.register(drain);

    let token = manager.token();
    run_with_graceful_shutdown(
        Arc::clone(&manager),
        async move {
            let shutdown = async move { token.cancelled().await };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!("Server error: {}", e);
            }
        },
        move || async move {
            // app 自行结束时 token 尚未取消，清理器需要它才会退出
            coordinator.manager().shutdown(ShutdownReason::UserInitiated);
            coordinator.run_cleanup().await;
        },
    )
    .await;

    tracing::info!(reason = ?manager.reason(), "Honeypot server stopped");
    Ok(())
}

#[cfg(not(feature = "server"))]
fn main() {
    eprintln!("请使用 --features server 编译: cargo run --bin honeypot-server --features server");
    std::process::exit(1);
}
