//! Concierge - 客服会话编排核心
//!
//! 入口：初始化日志、按配置装配编排器，在终端里驱动一个会话。

use std::io::Write;

use anyhow::Context;
use concierge::{agent::build_orchestrator, config::load_config, observability};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let (orchestrator, directory) =
        build_orchestrator(&cfg).context("Failed to build orchestrator")?;

    let thread_id = uuid::Uuid::new_v4().to_string();
    let greeting = orchestrator
        .start_thread(&thread_id)
        .await
        .context("Failed to start thread")?;
    println!("Agent: {}", greeting);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You: ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input.to_lowercase().as_str(), "exit" | "quit") {
            println!("Goodbye!");
            break;
        }

        match orchestrator.handle_user_input(&thread_id, input).await {
            Ok(outcome) => {
                if let Some(reply) = outcome.reply {
                    println!("Agent: {}", reply);
                }
                if outcome.ended {
                    break;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "pass failed");
                println!("Agent: Sorry, something went wrong. Please try again.");
            }
        }
    }

    let (prompt_tokens, completion_tokens, total_tokens) = orchestrator.token_usage();
    tracing::info!(prompt_tokens, completion_tokens, total_tokens, "session finished");
    directory.close();
    Ok(())
}
