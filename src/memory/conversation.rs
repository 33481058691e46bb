//! 消息日志：类型化的会话轮次
//!
//! Turn 为三选一的标签联合（用户 / 处理器 / 工具结果）；MessageLog 按插入顺序保存，
//! 只追加、从不重排，压缩时按索引集合整体保留或删除。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 处理器请求的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub id: String,
    pub name: String,
    /// 参数映射（JSON 对象）
    #[serde(default)]
    pub arguments: Value,
}

impl ToolRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// 处理器产出的一轮：自由文本和/或若干工具请求
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerTurn {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tool_requests: Vec<ToolRequest>,
}

impl HandlerTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_requests: Vec::new(),
        }
    }

    pub fn with_requests(tool_requests: Vec<ToolRequest>) -> Self {
        Self {
            text: String::new(),
            tool_requests,
        }
    }

    pub fn has_tool_requests(&self) -> bool {
        !self.tool_requests.is_empty()
    }

    pub fn contains_request(&self, request_id: &str) -> bool {
        self.tool_requests.iter().any(|r| r.id == request_id)
    }
}

/// 工具结果：通过 request_id 回指对应的 ToolRequest
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultTurn {
    pub request_id: String,
    pub tool_name: String,
    pub payload: String,
}

impl ToolResultTurn {
    pub fn new(
        request_id: impl Into<String>,
        tool_name: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            tool_name: tool_name.into(),
            payload: payload.into(),
        }
    }
}

/// 会话中的一轮
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    User { text: String },
    Handler(HandlerTurn),
    ToolResult(ToolResultTurn),
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Turn::User { text: text.into() }
    }

    pub fn handler_text(text: impl Into<String>) -> Self {
        Turn::Handler(HandlerTurn::text(text))
    }

    pub fn as_handler(&self) -> Option<&HandlerTurn> {
        match self {
            Turn::Handler(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResultTurn> {
        match self {
            Turn::ToolResult(r) => Some(r),
            _ => None,
        }
    }
}

/// 有序消息日志
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageLog {
    turns: Vec<Turn>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// 最近一条 HandlerTurn（不论其后是否已有工具结果）
    pub fn latest_handler_turn(&self) -> Option<&HandlerTurn> {
        self.turns.iter().rev().find_map(Turn::as_handler)
    }

    /// 待执行的工具请求：仅当日志末尾是携带请求的 HandlerTurn 时非空
    pub fn pending_tool_requests(&self) -> &[ToolRequest] {
        match self.turns.last() {
            Some(Turn::Handler(h)) => &h.tool_requests,
            _ => &[],
        }
    }

    /// 最近一条非空的处理器文本（对外回复）
    pub fn latest_handler_text(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .filter_map(Turn::as_handler)
            .map(|h| h.text.trim())
            .find(|t| !t.is_empty())
    }

    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResultTurn> {
        self.turns.iter().filter_map(Turn::as_tool_result)
    }

    /// 从 before（不含）向前查找包含 request_id 的 HandlerTurn 索引
    pub fn find_request_index(&self, before: usize, request_id: &str) -> Option<usize> {
        let end = before.min(self.turns.len());
        (0..end)
            .rev()
            .find(|&i| matches!(&self.turns[i], Turn::Handler(h) if h.contains_request(request_id)))
    }

    /// 每条工具结果是否都能在其之前找到对应请求
    pub fn has_orphan_results(&self) -> bool {
        self.turns.iter().enumerate().any(|(i, t)| match t {
            Turn::ToolResult(r) => self.find_request_index(i, &r.request_id).is_none(),
            _ => false,
        })
    }

    /// 仅保留给定索引，保持原有顺序
    pub fn retain_indices(&mut self, keep: &BTreeSet<usize>) {
        let turns = std::mem::take(&mut self.turns);
        self.turns = turns
            .into_iter()
            .enumerate()
            .filter(|(i, _)| keep.contains(i))
            .map(|(_, t)| t)
            .collect();
    }
}

impl From<Vec<Turn>> for MessageLog {
    fn from(turns: Vec<Turn>) -> Self {
        Self { turns }
    }
}

/// 将若干轮渲染为纯文本对话记录（供摘要使用，不依赖工具调用的配对结构）
pub fn render_transcript(turns: &[Turn]) -> String {
    let mut s = String::new();
    for turn in turns {
        match turn {
            Turn::User { text } => s.push_str(&format!("Customer: {}\n", text)),
            Turn::Handler(h) => {
                if !h.text.trim().is_empty() {
                    s.push_str(&format!("Agent: {}\n", h.text.trim()));
                }
                for r in &h.tool_requests {
                    s.push_str(&format!("Agent called {}({})\n", r.name, r.arguments));
                }
            }
            Turn::ToolResult(r) => {
                s.push_str(&format!("Result of {}: {}\n", r.tool_name, r.payload))
            }
        }
    }
    s
}
