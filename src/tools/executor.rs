//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时。execute(tool_name, args) 在超时内调用 registry.execute 并输出结构化审计日志（JSON）；
//! run_requests 按顺序执行一批 ToolRequest，每个请求恰好产出一条 ToolResultTurn，任何故障都转为错误文本，不中断本轮。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::memory::{ToolRequest, ToolResultTurn};
use crate::tools::{ToolError, ToolRegistry};

/// 工具执行器：对每次调用施加超时
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 执行指定工具；超时返回 ToolError::Timeout；输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, args: serde_json::Value) -> Result<String, ToolError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, self.registry.execute(tool_name, args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(r) => r,
            Err(_) => Err(ToolError::Timeout(tool_name.to_string())),
        }
    }

    /// 依次执行一批请求；allowed 为当前处理器可用的工具集合
    pub async fn run_requests(
        &self,
        requests: &[ToolRequest],
        allowed: &[String],
    ) -> Vec<ToolResultTurn> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            let outcome = if allowed.iter().any(|a| a == &request.name) {
                self.execute(&request.name, request.arguments.clone()).await
            } else {
                Err(ToolError::NotAllowed(request.name.clone()))
            };
            let payload = match outcome {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(tool = %request.name, request_id = %request.id, error = %e, "tool fault");
                    format!("Error: {}", e)
                }
            };
            results.push(ToolResultTurn::new(&request.id, &request.name, payload));
        }
        results
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
