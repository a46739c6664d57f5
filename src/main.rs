//! Sidekick 命令行入口
//!
//! 加载 .env 与配置、初始化日志、构建 SessionCoordinator，然后运行逐行交互：
//! 普通输入作为任务消息，`/criteria <text>` 设置成功标准，`/reset` 开新线程，
//! `/hard-reset` 清空全部线程，`/quit` 退出。Ctrl+C 取消进行中的任务并释放所有浏览器资源。

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use sidekick::agent::create_coordinator;
use sidekick::config::load_config;
use sidekick::core::new_thread_id;
use sidekick::memory::Role;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

const HELP: &str = "Commands: /criteria <text>, /reset, /hard-reset, /quit. Anything else is sent as a task.";

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    sidekick::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let coordinator = Arc::new(create_coordinator(&cfg).context("Failed to build sidekick")?);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, shutting down");
                shutdown.cancel();
            }
        });
    }

    let mut thread_id = new_thread_id();
    let mut criteria = String::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP);
    prompt();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = shutdown.cancelled() => break,
        };
        let Some(line) = line else { break };
        let input = line.trim();

        match input {
            "" => {}
            "/quit" | "/exit" => break,
            "/help" => println!("{}", HELP),
            "/reset" => {
                thread_id = coordinator.reset_thread(&thread_id).await?;
                println!("Started a new conversation ({}).", thread_id);
            }
            "/hard-reset" => {
                thread_id = coordinator.hard_reset().await?;
                println!("All conversations cleared ({}).", thread_id);
            }
            _ if input.starts_with("/criteria") => {
                criteria = input.trim_start_matches("/criteria").trim().to_string();
                println!("Success criteria: {}", criteria);
            }
            _ => {
                let replies = tokio::select! {
                    r = coordinator.process(&thread_id, input, &criteria) => r?,
                    _ = shutdown.cancelled() => break,
                };
                for msg in replies.iter().filter(|m| m.role == Role::Assistant) {
                    println!("{}\n", msg.content);
                }
            }
        }
        prompt();
    }

    coordinator.shutdown().await;
    Ok(())
}
