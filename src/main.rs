//! Honeypot 控制台
//!
//! 从标准输入逐行读取对方消息，作为同一个会话交给引擎处理，打印回复与会话摘要。
//! 输入 `/summary` 打印完整快照，`/quit` 退出。

use std::sync::Arc;

use anyhow::Context;
use honeypot::config::load_config;
use honeypot::core::{
    EngineBuilder, InboundMessage, ShutdownCoordinator, ShutdownManager, ShutdownReason,
};
use tokio::io::{AsyncBufReadExt, BufReader};

const CONSOLE_SESSION: &str = "console";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    honeypot::observability::init();

    let config = load_config(std::env::args().nth(1).map(Into::into))
        .context("Failed to load configuration")?;
    let idle_reply = config.server.idle_reply.clone();
    let sender = config.engagement.counterparty_role.clone();

    let manager = Arc::new(ShutdownManager::new());
    let engine = EngineBuilder::new(config).build(manager.token())?;
    let orchestrator = Arc::clone(&engine.orchestrator);

    println!("Honeypot console. Type messages as the counterparty; /summary, /quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let text = line.trim();
        match text {
            "" => continue,
            "/quit" | "/exit" => break,
            "/summary" => {
                if let Some(summary) = orchestrator.store().snapshot(CONSOLE_SESSION).await {
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                }
                continue;
            }
            _ => {}
        }

        match orchestrator
            .handle_message(CONSOLE_SESSION, InboundMessage::new(sender.as_str(), text))
            .await
        {
            Ok(outcome) => {
                let reply = outcome.reply.unwrap_or_else(|| idle_reply.clone());
                println!("> {}", reply);
                println!(
                    "  [{:?} confidence={:.2} messages={} artifacts={}{}]",
                    outcome.summary.stage,
                    outcome.summary.confidence,
                    outcome.summary.message_count,
                    outcome.summary.artifacts.len(),
                    if outcome.reported_now { " reported" } else { "" }
                );
            }
            Err(e) => eprintln!("{}", e),
        }
    }

    let (sweeper, drain) = engine.into_cleanups();
    let mut coordinator = ShutdownCoordinator::new(Arc::clone(&manager));
    coordinator.register(sweeper);
    coordinator.register(drain);
    manager.shutdown(ShutdownReason::UserInitiated);
    coordinator.run_cleanup().await;

    Ok(())
}
