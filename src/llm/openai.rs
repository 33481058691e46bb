//! OpenAI 兼容 API 客户端
//!
//! 直接以 JSON 调用 `/chat/completions`（可配置 base_url），支持 tools / tool_calls；
//! DeepSeek、OpenAI、自建代理均可使用。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::llm::{CompletionRequest, LlmClient, LlmError, ToolSpec};
use crate::memory::{HandlerTurn, ToolRequest, Turn};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI 兼容客户端：持有 HTTP Client、base_url、model 与温度
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key: Option<&str>,
        temperature: f32,
        timeout_secs: u64,
    ) -> Result<Self, LlmError> {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LlmError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: model.to_string(),
            temperature,
            usage: TokenUsage::new(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn record_usage(&self, data: &Value) {
        if let Some(usage) = data.get("usage") {
            self.usage.add(
                usage["prompt_tokens"].as_u64().unwrap_or(0),
                usage["completion_tokens"].as_u64().unwrap_or(0),
            );
        }
    }
}

/// 将 system 段落与轮次转换为 Chat Completions 的 messages 数组
pub(crate) fn to_wire_messages(request: &CompletionRequest) -> Vec<Value> {
    let mut messages: Vec<Value> = request
        .system
        .iter()
        .map(|s| json!({"role": "system", "content": s}))
        .collect();

    for turn in &request.turns {
        let msg = match turn {
            Turn::User { text } => json!({"role": "user", "content": text}),
            Turn::Handler(h) => {
                let content = if h.text.is_empty() {
                    Value::Null
                } else {
                    Value::String(h.text.clone())
                };
                let mut msg = json!({"role": "assistant", "content": content});
                if h.has_tool_requests() {
                    let calls: Vec<Value> = h
                        .tool_requests
                        .iter()
                        .map(|r| {
                            json!({
                                "id": r.id,
                                "type": "function",
                                "function": {
                                    "name": r.name,
                                    "arguments": r.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                    msg["tool_calls"] = Value::Array(calls);
                }
                msg
            }
            Turn::ToolResult(r) => json!({
                "role": "tool",
                "tool_call_id": r.request_id,
                "content": r.payload,
            }),
        };
        messages.push(msg);
    }
    messages
}

pub(crate) fn to_wire_tools(tools: &[ToolSpec]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect()
}

/// 解析首个 choice 的 message 为 HandlerTurn；参数不是合法 JSON 时原样保留为字符串，交给工具报错
pub(crate) fn parse_wire_response(data: &Value) -> Result<HandlerTurn, LlmError> {
    let message = data["choices"]
        .get(0)
        .map(|c| &c["message"])
        .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;

    let text = message["content"].as_str().unwrap_or_default().to_string();

    let mut tool_requests = Vec::new();
    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let id = call["id"]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(String::from)
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
            let name = call["function"]["name"].as_str().unwrap_or_default();
            let raw_args = call["function"]["arguments"].as_str().unwrap_or("{}");
            let arguments = serde_json::from_str(raw_args)
                .unwrap_or_else(|_| Value::String(raw_args.to_string()));
            tool_requests.push(ToolRequest::new(id, name, arguments));
        }
    }

    Ok(HandlerTurn {
        text,
        tool_requests,
    })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<HandlerTurn, LlmError> {
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": to_wire_messages(request),
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(to_wire_tools(&request.tools));
        }

        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(model = %self.model, tools = request.tools.len(), "calling completion API");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        if !status.is_success() {
            tracing::error!(status = %status, "completion API error: {}", text);
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let data: Value =
            serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        self.record_usage(&data);
        parse_wire_response(&data)
    }
}
