//! 会话状态：每个 thread 一份
//!
//! 日志、当前处理器、核验失败计数（锁定判断的权威来源）、是否已核验、是否已结束、滚动摘要。
//! 处理器切换、计数重置、锁定只能通过这里的方法发生，由路由决策驱动。

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::router::RoutingRules;
use crate::memory::{MessageLog, ToolResultTurn, Turn};

/// 三个处理阶段
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// 身份核验
    #[default]
    Verifier,
    /// 核验后的账户分诊
    Triage,
    /// 专家转接
    Escalation,
}

impl HandlerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Verifier => "verifier",
            HandlerKind::Triage => "triage",
            HandlerKind::Escalation => "escalation",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条核验类工具结果对计数器的影响
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationEffect {
    /// 非核验工具，计数不变
    None,
    /// 携带成功标记，计数归零
    Succeeded,
    /// 未携带成功标记，计数 +1
    Failed { attempts: u32 },
}

/// 会话状态（检查点存储的单位）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    thread_id: String,
    #[serde(default)]
    pub(crate) log: MessageLog,
    #[serde(default)]
    active_handler: HandlerKind,
    #[serde(default)]
    failed_verification_attempts: u32,
    #[serde(default)]
    is_verified: bool,
    #[serde(default)]
    ended: bool,
    #[serde(default)]
    summary: Option<String>,
    /// 最后一次保存的时间（毫秒时间戳）
    #[serde(default)]
    updated_at: i64,
}

impl ConversationState {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            ..Self::default()
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn active_handler(&self) -> HandlerKind {
        self.active_handler
    }

    pub fn failed_verification_attempts(&self) -> u32 {
        self.failed_verification_attempts
    }

    pub fn is_verified(&self) -> bool {
        self.is_verified
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    pub fn push_turn(&mut self, turn: Turn) {
        self.log.push(turn);
    }

    /// 追加工具结果，并在路由决策之前更新核验失败计数；只有 Verifier 激活时才计数
    pub fn record_tool_result(
        &mut self,
        result: ToolResultTurn,
        rules: &RoutingRules,
    ) -> VerificationEffect {
        let effect = if self.active_handler != HandlerKind::Verifier
            || !rules.is_verification_result(&result)
        {
            VerificationEffect::None
        } else if rules.is_verification_success(&result) {
            self.failed_verification_attempts = 0;
            VerificationEffect::Succeeded
        } else {
            self.failed_verification_attempts += 1;
            VerificationEffect::Failed {
                attempts: self.failed_verification_attempts,
            }
        };
        self.log.push(Turn::ToolResult(result));
        effect
    }

    /// 切换当前处理器；离开 Verifier 时计数归零
    pub(crate) fn transition_to(&mut self, next: HandlerKind) {
        if self.active_handler == next {
            return;
        }
        if self.active_handler == HandlerKind::Verifier {
            self.failed_verification_attempts = 0;
        }
        tracing::info!(
            thread_id = %self.thread_id,
            from = %self.active_handler,
            to = %next,
            "handler transition"
        );
        self.active_handler = next;
    }

    /// 核验成功：标记已核验、计数归零、转入 Triage
    pub(crate) fn promote(&mut self) {
        self.is_verified = true;
        self.failed_verification_attempts = 0;
        self.transition_to(HandlerKind::Triage);
    }

    /// 锁定：追加固定结束语并终止会话
    pub(crate) fn lock_out(&mut self, closing_message: &str) {
        self.log.push(Turn::handler_text(closing_message));
        self.ended = true;
    }

    /// 安装新摘要并删除未保留的轮次（同一次状态变更内完成）；空摘要不会覆盖已有摘要
    pub(crate) fn apply_compaction(&mut self, summary: String, keep: &BTreeSet<usize>) {
        let summary = summary.trim();
        if !summary.is_empty() {
            self.summary = Some(summary.to_string());
        }
        self.log.retain_indices(keep);
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}
