//! Mock LLM 客户端（用于测试与离线演示，无需 API）
//!
//! 按顺序回放预先排好的回复；队列耗尽后回显最后一条用户消息。每次请求都会被记录，便于断言。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{CompletionRequest, LlmClient, LlmError};
use crate::memory::{HandlerTurn, Turn};

/// 脚本化客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<HandlerTurn, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: Vec<Result<HandlerTurn, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 已收到的请求（按顺序）
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<HandlerTurn, LlmError> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(request.clone());
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        if let Some(reply) = scripted {
            return reply;
        }

        let last_user = request
            .turns
            .iter()
            .rev()
            .find_map(|t| match t {
                Turn::User { text } => Some(text.as_str()),
                _ => None,
            })
            .unwrap_or("(no input)");
        Ok(HandlerTurn::text(format!("Echo from Mock: {}", last_user)))
    }
}
