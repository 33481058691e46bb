//! History Compactor：把较早的轮次折叠进滚动摘要
//!
//! 保留最近 K 轮原样不动，再做一次修复：
//! - 每条保留的工具结果，在压缩前的完整日志中向前找到发出该请求的 HandlerTurn 并一起保留；找不到则丢弃该结果；
//! - 每条保留的 HandlerTurn，其请求对应的兄弟结果也一并保留，保证一组请求/结果完整。
//!
//! 新摘要的安装与轮次删除在同一次状态变更内完成（ConversationState::apply_compaction）。

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::core::ConversationState;
use crate::llm::{CompletionRequest, LlmClient, LlmError};
use crate::memory::{render_transcript, MessageLog, Turn};

/// 默认触发阈值（日志轮数）
pub const DEFAULT_COMPACT_THRESHOLD: usize = 24;
/// 默认原样保留的最近轮数
pub const DEFAULT_KEEP_RECENT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompactionPolicy {
    /// 日志长度超过该值时触发
    pub threshold: usize,
    /// 最近 K 轮原样保留
    pub keep_recent: usize,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_COMPACT_THRESHOLD,
            keep_recent: DEFAULT_KEEP_RECENT,
        }
    }
}

/// 一次压缩的结果
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub dropped: usize,
    pub retained: usize,
}

/// 计算应保留的索引集合（纯函数，同一日志总得到同一结果）
pub fn plan_retention(log: &MessageLog, keep_recent: usize) -> BTreeSet<usize> {
    let turns = log.turns();
    let start = turns.len().saturating_sub(keep_recent);
    let mut keep: BTreeSet<usize> = (start..turns.len()).collect();

    // 工具结果 -> 其请求所在的 HandlerTurn
    let window: Vec<usize> = keep.iter().copied().collect();
    for i in window {
        if let Turn::ToolResult(r) = &turns[i] {
            match log.find_request_index(i, &r.request_id) {
                Some(j) => {
                    keep.insert(j);
                }
                None => {
                    keep.remove(&i);
                }
            }
        }
    }

    // HandlerTurn -> 其请求对应的兄弟结果
    let handlers: Vec<usize> = keep
        .iter()
        .copied()
        .filter(|&j| turns[j].as_handler().is_some_and(|h| h.has_tool_requests()))
        .collect();
    for j in handlers {
        for (i, turn) in turns.iter().enumerate().skip(j + 1) {
            if let Turn::ToolResult(r) = turn {
                if log.find_request_index(i, &r.request_id) == Some(j) {
                    keep.insert(i);
                }
            }
        }
    }

    keep
}

fn summary_prompt(previous: Option<&str>, dropped: &[Turn]) -> String {
    let transcript = render_transcript(dropped);
    match previous {
        Some(summary) if !summary.trim().is_empty() => format!(
            "This is summary of the conversation to date: {}\n\n\
             Extend the summary by taking into account the new messages below:\n\n{}",
            summary.trim(),
            transcript
        ),
        _ => format!("Create a summary of the conversation below:\n\n{}", transcript),
    }
}

/// 历史压缩器：一次补全调用生成新摘要
pub struct HistoryCompactor {
    llm: Arc<dyn LlmClient>,
    policy: CompactionPolicy,
}

impl HistoryCompactor {
    pub fn new(llm: Arc<dyn LlmClient>, policy: CompactionPolicy) -> Self {
        Self { llm, policy }
    }

    pub fn policy(&self) -> CompactionPolicy {
        self.policy
    }

    pub fn should_compact(&self, state: &ConversationState) -> bool {
        state.log().len() > self.policy.threshold
    }

    /// 压缩一个会话；补全失败时 state 不变
    pub async fn compact(
        &self,
        state: &mut ConversationState,
    ) -> Result<CompactionReport, LlmError> {
        let keep = plan_retention(state.log(), self.policy.keep_recent);
        let dropped: Vec<Turn> = state
            .log()
            .turns()
            .iter()
            .enumerate()
            .filter(|(i, _)| !keep.contains(i))
            .map(|(_, t)| t.clone())
            .collect();
        if dropped.is_empty() {
            return Ok(CompactionReport {
                dropped: 0,
                retained: state.log().len(),
            });
        }

        let request = CompletionRequest {
            system: Vec::new(),
            turns: vec![Turn::user(summary_prompt(state.summary(), &dropped))],
            tools: Vec::new(),
        };
        let reply = self.llm.complete(&request).await?;
        let summary = reply.text.trim().to_string();
        if summary.is_empty() {
            tracing::warn!(thread_id = %state.thread_id(), "compaction produced an empty summary, log left intact");
            return Ok(CompactionReport {
                dropped: 0,
                retained: state.log().len(),
            });
        }

        state.apply_compaction(summary, &keep);
        let report = CompactionReport {
            dropped: dropped.len(),
            retained: keep.len(),
        };
        tracing::info!(
            thread_id = %state.thread_id(),
            dropped = report.dropped,
            retained = report.retained,
            "conversation compacted"
        );
        Ok(report)
    }
}
