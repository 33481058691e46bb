//! 路由：每个处理器一张有序谓词决策表
//!
//! 处理器产出新一轮后，按表顺序求值，首个命中的谓词决定下一条边；都不命中则走表的兜底边。
//! 工具执行完后另有子路由（route_after_tools），决定是提升、转交还是回到原处理器。
//! 所有函数只读 ConversationState，不调用补全服务，可直接用合成日志做单元测试。

use crate::core::state::{ConversationState, HandlerKind};
use crate::memory::ToolResultTurn;
use crate::tools::{HANDOFF_TO_SPECIALIST, SUCCESS_MARKER, VERIFY_ANSWER};

/// 锁定阈值默认值
pub const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 3;

/// 路由所需的工具分类与阈值
#[derive(Clone, Debug)]
pub struct RoutingRules {
    /// 身份核验工具名
    pub verification_tool: String,
    /// 核验成功标记（出现在结果文本中即视为成功）
    pub success_marker: String,
    /// 转交类工具名
    pub handoff_tools: Vec<String>,
    pub max_failed_attempts: u32,
}

impl Default for RoutingRules {
    fn default() -> Self {
        Self {
            verification_tool: VERIFY_ANSWER.to_string(),
            success_marker: SUCCESS_MARKER.to_string(),
            handoff_tools: vec![HANDOFF_TO_SPECIALIST.to_string()],
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
        }
    }
}

impl RoutingRules {
    pub fn is_verification_result(&self, result: &ToolResultTurn) -> bool {
        result.tool_name == self.verification_tool
    }

    pub fn is_verification_success(&self, result: &ToolResultTurn) -> bool {
        self.is_verification_result(result) && result.payload.contains(&self.success_marker)
    }

    pub fn is_handoff(&self, tool_name: &str) -> bool {
        self.handoff_tools.iter().any(|t| t == tool_name)
    }
}

/// 处理器之后的控制流边
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// 挂起，等待下一条用户输入
    AwaitInput,
    /// 执行最新 HandlerTurn 中的工具请求
    RunTool,
    /// 核验通过，转入 Triage
    Promote,
    /// 失败次数达到阈值，终止会话
    Lockout,
}

/// 工具执行后的子路由结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AfterTools {
    /// 核验成功，直接提升，不再回到 Verifier
    Promote,
    /// 转交到另一个处理器
    Transfer(HandlerKind),
    /// 回到当前处理器，让其对工具结果作出反应
    Return,
}

type Predicate = fn(&ConversationState, &RoutingRules) -> bool;

/// 有序谓词表 + 兜底边
pub struct DecisionTable {
    rules: &'static [(Predicate, Route)],
    fallback: Route,
}

impl DecisionTable {
    pub fn decide(&self, state: &ConversationState, rules: &RoutingRules) -> Route {
        self.rules
            .iter()
            .find(|(predicate, _)| predicate(state, rules))
            .map(|(_, route)| *route)
            .unwrap_or(self.fallback)
    }
}

fn lockout_reached(state: &ConversationState, rules: &RoutingRules) -> bool {
    state.failed_verification_attempts() >= rules.max_failed_attempts
}

fn has_pending_requests(state: &ConversationState, _rules: &RoutingRules) -> bool {
    !state.log().pending_tool_requests().is_empty()
}

fn verified_in_history(state: &ConversationState, rules: &RoutingRules) -> bool {
    state
        .log()
        .tool_results()
        .any(|r| rules.is_verification_success(r))
}

static VERIFIER_TABLE: DecisionTable = DecisionTable {
    rules: &[
        (lockout_reached as Predicate, Route::Lockout),
        (has_pending_requests as Predicate, Route::RunTool),
        (verified_in_history as Predicate, Route::Promote),
    ],
    fallback: Route::AwaitInput,
};

static TRIAGE_TABLE: DecisionTable = DecisionTable {
    rules: &[(has_pending_requests as Predicate, Route::RunTool)],
    fallback: Route::AwaitInput,
};

static ESCALATION_TABLE: DecisionTable = DecisionTable {
    rules: &[(has_pending_requests as Predicate, Route::RunTool)],
    fallback: Route::AwaitInput,
};

pub fn decision_table(handler: HandlerKind) -> &'static DecisionTable {
    match handler {
        HandlerKind::Verifier => &VERIFIER_TABLE,
        HandlerKind::Triage => &TRIAGE_TABLE,
        HandlerKind::Escalation => &ESCALATION_TABLE,
    }
}

/// 处理器产出新一轮后的主路由
pub fn route(handler: HandlerKind, state: &ConversationState, rules: &RoutingRules) -> Route {
    decision_table(handler).decide(state, rules)
}

/// 工具结果子路由：results 为刚执行完的这一批结果
pub fn route_after_tools(
    handler: HandlerKind,
    results: &[ToolResultTurn],
    rules: &RoutingRules,
) -> AfterTools {
    match handler {
        HandlerKind::Verifier => {
            if results.iter().any(|r| rules.is_verification_success(r)) {
                AfterTools::Promote
            } else {
                AfterTools::Return
            }
        }
        HandlerKind::Triage => {
            if results.iter().any(|r| rules.is_handoff(&r.tool_name)) {
                AfterTools::Transfer(HandlerKind::Escalation)
            } else {
                AfterTools::Return
            }
        }
        HandlerKind::Escalation => AfterTools::Return,
    }
}
