//! 处理器调用：Verifier / Triage / Escalation 共用同一契约
//!
//! 输入为指令文本、当前保留的日志（有摘要时以 system 段前置）与该处理器可请求的工具子集，
//! 输出恰好一条 HandlerTurn。若其中含转交类请求，附带的文本在追加前被清空。

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::{ConversationState, HandlerKind, RoutingRules};
use crate::llm::{CompletionRequest, LlmClient, LlmError, ToolSpec};
use crate::memory::HandlerTurn;
use crate::tools::{
    ToolRegistry, CHECK_ACCOUNT_STATUS, HANDOFF_TO_SPECIALIST, LOOKUP_CUSTOMER, ROUTE_TO_EXPERT,
    VERIFY_ANSWER,
};

/// 各处理器默认可用的工具
pub fn default_capabilities(kind: HandlerKind) -> Vec<String> {
    let names: &[&str] = match kind {
        HandlerKind::Verifier => &[LOOKUP_CUSTOMER, VERIFY_ANSWER],
        HandlerKind::Triage => &[CHECK_ACCOUNT_STATUS, HANDOFF_TO_SPECIALIST],
        HandlerKind::Escalation => &[ROUTE_TO_EXPERT],
    };
    names.iter().map(|s| s.to_string()).collect()
}

/// 单个处理器的配置
#[derive(Clone, Debug)]
pub struct HandlerProfile {
    pub kind: HandlerKind,
    pub instructions: String,
    /// 能力集：允许请求的工具名
    pub tools: Vec<String>,
}

impl HandlerProfile {
    pub fn new(kind: HandlerKind, instructions: impl Into<String>) -> Self {
        Self {
            kind,
            instructions: instructions.into(),
            tools: default_capabilities(kind),
        }
    }
}

struct PreparedHandler {
    profile: HandlerProfile,
    tool_specs: Vec<ToolSpec>,
}

/// 三个处理器 + 共享的补全服务
pub struct HandlerSet {
    llm: Arc<dyn LlmClient>,
    handlers: HashMap<HandlerKind, PreparedHandler>,
}

impl HandlerSet {
    /// 用各处理器的配置与工具注册表构建；未提供配置的处理器使用内置指令
    pub fn new(llm: Arc<dyn LlmClient>, profiles: Vec<HandlerProfile>, registry: &ToolRegistry) -> Self {
        let mut by_kind: HashMap<HandlerKind, HandlerProfile> =
            profiles.into_iter().map(|p| (p.kind, p)).collect();
        let handlers = [HandlerKind::Verifier, HandlerKind::Triage, HandlerKind::Escalation]
            .into_iter()
            .map(|kind| {
                let profile = by_kind.remove(&kind).unwrap_or_else(|| {
                    HandlerProfile::new(kind, crate::agents::prompts::default_instructions(kind))
                });
                let tool_specs = registry.specs_for(&profile.tools);
                (kind, PreparedHandler { profile, tool_specs })
            })
            .collect();
        Self { llm, handlers }
    }

    pub fn llm(&self) -> &dyn LlmClient {
        self.llm.as_ref()
    }

    /// 该处理器的能力集
    pub fn allowed_tools(&self, kind: HandlerKind) -> &[String] {
        self.handlers
            .get(&kind)
            .map(|h| h.profile.tools.as_slice())
            .unwrap_or(&[])
    }

    /// 组装补全请求（不调用服务）
    pub fn build_request(&self, kind: HandlerKind, state: &ConversationState) -> CompletionRequest {
        let mut system = Vec::new();
        let mut tools = Vec::new();
        if let Some(h) = self.handlers.get(&kind) {
            system.push(h.profile.instructions.clone());
            tools = h.tool_specs.clone();
        }
        if let Some(summary) = state.summary() {
            system.push(format!("Summary of conversation earlier: {}", summary));
        }
        CompletionRequest {
            system,
            turns: state.log().turns().to_vec(),
            tools,
        }
    }

    /// 调用处理器，返回待追加的 HandlerTurn
    pub async fn invoke(
        &self,
        kind: HandlerKind,
        state: &ConversationState,
        rules: &RoutingRules,
    ) -> Result<HandlerTurn, LlmError> {
        let request = self.build_request(kind, state);
        tracing::debug!(
            thread_id = %state.thread_id(),
            handler = %kind,
            turns = request.turns.len(),
            tools = request.tools.len(),
            "invoking handler"
        );
        let mut turn = self.llm.complete(&request).await?;
        if turn.tool_requests.iter().any(|r| rules.is_handoff(&r.name)) && !turn.text.is_empty() {
            tracing::debug!(handler = %kind, "stripping text from handoff turn");
            turn.text.clear();
        }
        Ok(turn)
    }
}
