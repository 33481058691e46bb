//! 编排器：主控循环
//!
//! 一次 pass 由一条用户输入触发：读检查点 → 追加 UserTurn →（必要时）压缩 →
//! 反复执行 分派 → 处理器调用 → 路由 →（可选）工具执行 + 子路由，直到 AwaitInput 或 Lockout → 写检查点。
//! 同一 thread_id 的 pass 串行执行；不同 thread 完全独立。
//! 所有修改都作用在工作副本上，只有 pass 成功结束才保存，补全或检查点失败时已存储的状态保持不变。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::agents::{HandlerSet, CLOSING_MESSAGE, GREETING};
use crate::core::dispatcher::dispatch;
use crate::core::router::{route, route_after_tools, AfterTools, Route, RoutingRules};
use crate::core::{AgentError, ConversationState, HandlerKind};
use crate::memory::{CheckpointStore, CompactionReport, HistoryCompactor, HandlerTurn, Turn};
use crate::tools::ToolExecutor;

/// 单个 pass 内处理器调用次数的默认上限
pub const DEFAULT_MAX_STEPS: usize = 12;

/// 一次 pass 的结果
#[derive(Clone, Debug, PartialEq)]
pub struct PassOutcome {
    pub thread_id: String,
    /// 最近一条非空的处理器文本
    pub reply: Option<String>,
    pub ended: bool,
    pub active_handler: HandlerKind,
}

impl PassOutcome {
    fn from_state(state: &ConversationState, reply: Option<String>) -> Self {
        Self {
            thread_id: state.thread_id().to_string(),
            reply,
            ended: state.is_ended(),
            active_handler: state.active_handler(),
        }
    }
}

/// 会话编排器，可在多个任务间共享（Arc）
pub struct Orchestrator {
    handlers: HandlerSet,
    executor: ToolExecutor,
    compactor: Option<HistoryCompactor>,
    store: Arc<dyn CheckpointStore>,
    rules: RoutingRules,
    max_steps: usize,
    /// thread_id -> 该会话的串行锁
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        handlers: HandlerSet,
        executor: ToolExecutor,
        store: Arc<dyn CheckpointStore>,
        rules: RoutingRules,
    ) -> Self {
        Self {
            handlers,
            executor,
            compactor: None,
            store,
            rules,
            max_steps: DEFAULT_MAX_STEPS,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_compactor(mut self, compactor: HistoryCompactor) -> Self {
        self.compactor = Some(compactor);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn rules(&self) -> &RoutingRules {
        &self.rules
    }

    /// 开场白
    pub fn greeting(&self) -> &'static str {
        GREETING
    }

    /// 补全服务累计 token：(prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.handlers.llm().token_usage()
    }

    async fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(thread_id.to_string()).or_default().clone()
    }

    /// 归还串行锁；没有其他持有者时从表中移除
    async fn release_lock(&self, thread_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        if locks
            .get(thread_id)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(thread_id);
        }
    }

    async fn load_or_new(&self, thread_id: &str) -> Result<ConversationState, AgentError> {
        Ok(self
            .store
            .load(thread_id)
            .await?
            .unwrap_or_else(|| ConversationState::new(thread_id)))
    }

    async fn save(&self, state: &mut ConversationState) -> Result<(), AgentError> {
        state.touch();
        self.store.save(state).await?;
        Ok(())
    }

    /// 新会话：以开场白作为第一条 HandlerTurn；已存在的会话不做修改
    pub async fn start_thread(&self, thread_id: &str) -> Result<String, AgentError> {
        let lock = self.thread_lock(thread_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.seed_thread(thread_id).await
        };
        self.release_lock(thread_id, lock).await;
        result
    }

    async fn seed_thread(&self, thread_id: &str) -> Result<String, AgentError> {
        if self.store.load(thread_id).await?.is_none() {
            let mut state = ConversationState::new(thread_id);
            state.push_turn(Turn::Handler(HandlerTurn::text(GREETING)));
            self.save(&mut state).await?;
            tracing::info!(thread_id, "thread started");
        }
        Ok(GREETING.to_string())
    }

    /// 只读快照
    pub async fn snapshot(&self, thread_id: &str) -> Result<Option<ConversationState>, AgentError> {
        Ok(self.store.load(thread_id).await?)
    }

    /// 手动压缩一个会话；未配置压缩器或会话不存在时返回 None
    pub async fn compact_thread(
        &self,
        thread_id: &str,
    ) -> Result<Option<CompactionReport>, AgentError> {
        let Some(compactor) = &self.compactor else {
            return Ok(None);
        };
        let lock = self.thread_lock(thread_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.compact_stored(compactor, thread_id).await
        };
        self.release_lock(thread_id, lock).await;
        result
    }

    async fn compact_stored(
        &self,
        compactor: &HistoryCompactor,
        thread_id: &str,
    ) -> Result<Option<CompactionReport>, AgentError> {
        let Some(mut state) = self.store.load(thread_id).await? else {
            return Ok(None);
        };
        let report = compactor.compact(&mut state).await?;
        if report.dropped > 0 {
            self.save(&mut state).await?;
        }
        Ok(Some(report))
    }

    /// 处理一条用户输入：跑完整个 pass 后返回回复与结束标记
    pub async fn handle_user_input(
        &self,
        thread_id: &str,
        text: &str,
    ) -> Result<PassOutcome, AgentError> {
        let lock = self.thread_lock(thread_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.locked_pass(thread_id, text).await
        };
        self.release_lock(thread_id, lock).await;
        result
    }

    async fn locked_pass(&self, thread_id: &str, text: &str) -> Result<PassOutcome, AgentError> {
        let mut state = self.load_or_new(thread_id).await?;
        if state.is_ended() {
            tracing::info!(thread_id, "input ignored, thread has ended");
            return Ok(PassOutcome::from_state(&state, None));
        }

        tracing::info!(thread_id, handler = %state.active_handler(), "pass started");
        state.push_turn(Turn::user(text));

        if let Some(compactor) = &self.compactor {
            if compactor.should_compact(&state) {
                if let Err(e) = compactor.compact(&mut state).await {
                    tracing::warn!(thread_id, error = %e, "compaction failed, continuing with full log");
                }
            }
        }

        self.run_pass(&mut state).await?;
        self.save(&mut state).await?;

        let reply = state.log().latest_handler_text().map(str::to_string);
        tracing::info!(
            thread_id,
            handler = %state.active_handler(),
            ended = state.is_ended(),
            "pass finished"
        );
        Ok(PassOutcome::from_state(&state, reply))
    }

    /// 分派 → 调用 → 路由，直到等待输入或锁定
    async fn run_pass(&self, state: &mut ConversationState) -> Result<(), AgentError> {
        for _ in 0..self.max_steps {
            let handler = dispatch(state);
            let turn = self.handlers.invoke(handler, state, &self.rules).await?;
            state.push_turn(Turn::Handler(turn));

            let decision = route(handler, state, &self.rules);
            tracing::debug!(thread_id = %state.thread_id(), %handler, ?decision, "route");
            match decision {
                Route::AwaitInput => return Ok(()),
                Route::Lockout => {
                    tracing::warn!(
                        thread_id = %state.thread_id(),
                        attempts = state.failed_verification_attempts(),
                        "verification lockout"
                    );
                    state.lock_out(CLOSING_MESSAGE);
                    return Ok(());
                }
                Route::Promote => state.promote(),
                Route::RunTool => self.run_tools(handler, state).await,
            }
        }
        tracing::warn!(
            thread_id = %state.thread_id(),
            max_steps = self.max_steps,
            "step limit reached, awaiting input"
        );
        Ok(())
    }

    /// 执行最新 HandlerTurn 的全部请求，更新计数并走工具子路由
    async fn run_tools(&self, handler: HandlerKind, state: &mut ConversationState) {
        let requests = state.log().pending_tool_requests().to_vec();
        let results = self
            .executor
            .run_requests(&requests, self.handlers.allowed_tools(handler))
            .await;
        for result in results.iter().cloned() {
            state.record_tool_result(result, &self.rules);
        }

        match route_after_tools(handler, &results, &self.rules) {
            AfterTools::Promote => state.promote(),
            AfterTools::Transfer(next) => state.transition_to(next),
            AfterTools::Return => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::HandlerSet;
    use crate::llm::{LlmError, MockLlmClient};
    use crate::memory::{CompactionPolicy, InMemoryCheckpointStore, ToolRequest, ToolResultTurn};
    use crate::tools::directory::fixtures::DIRECTORY_JSON;
    use crate::tools::{create_registry, CustomerDirectory, LOOKUP_CUSTOMER};
    use serde_json::json;

    fn compacting_orchestrator(
        script: Vec<Result<HandlerTurn, LlmError>>,
    ) -> (Orchestrator, Arc<InMemoryCheckpointStore>) {
        let llm = Arc::new(MockLlmClient::with_script(script));
        let directory = Arc::new(CustomerDirectory::from_json(DIRECTORY_JSON).unwrap());
        let registry = create_registry(directory);
        let handlers = HandlerSet::new(llm.clone(), Vec::new(), &registry);
        let executor = ToolExecutor::new(registry, 5);
        let store = Arc::new(InMemoryCheckpointStore::new());
        let compactor = HistoryCompactor::new(
            llm,
            CompactionPolicy {
                threshold: 4,
                keep_recent: 2,
            },
        );
        let orch = Orchestrator::new(handlers, executor, store.clone(), RoutingRules::default())
            .with_compactor(compactor);
        (orch, store)
    }

    /// 7 轮：最后两轮是一条请求的结果与一条文本回复，请求本身在窗口之外
    fn long_thread(id: &str) -> ConversationState {
        let mut state = ConversationState::new(id);
        state.push_turn(Turn::user("Hi, I'm Lisa"));
        state.push_turn(Turn::handler_text("Please share your phone."));
        state.push_turn(Turn::user("+1122334455"));
        state.push_turn(Turn::Handler(HandlerTurn::with_requests(vec![ToolRequest::new(
            "l1",
            LOOKUP_CUSTOMER,
            json!({"name": "Lisa", "phone": "+1122334455"}),
        )])));
        state.push_turn(Turn::user("hello?"));
        state.push_turn(Turn::ToolResult(ToolResultTurn::new(
            "l1",
            LOOKUP_CUSTOMER,
            "Which is the name of your dog?",
        )));
        state.push_turn(Turn::handler_text("Which is the name of your dog?"));
        state
    }

    fn orchestrator(script: Vec<Result<HandlerTurn, LlmError>>) -> (Orchestrator, Arc<MockLlmClient>) {
        let llm = Arc::new(MockLlmClient::with_script(script));
        let directory = Arc::new(CustomerDirectory::from_json(DIRECTORY_JSON).unwrap());
        let registry = create_registry(directory);
        let handlers = HandlerSet::new(llm.clone(), Vec::new(), &registry);
        let executor = ToolExecutor::new(registry, 5);
        let store = Arc::new(InMemoryCheckpointStore::new());
        (
            Orchestrator::new(handlers, executor, store, RoutingRules::default()),
            llm,
        )
    }

    #[tokio::test]
    async fn test_plain_reply_awaits_input() {
        let (orch, _) = orchestrator(vec![Ok(HandlerTurn::text("Please share your phone."))]);
        let out = orch.handle_user_input("t1", "I'm Lisa").await.unwrap();
        assert_eq!(out.reply.as_deref(), Some("Please share your phone."));
        assert!(!out.ended);
        assert_eq!(out.active_handler, HandlerKind::Verifier);
        assert_eq!(orch.snapshot("t1").await.unwrap().unwrap().log().len(), 2);
    }

    #[tokio::test]
    async fn test_tool_round_trip_within_one_pass() {
        let (orch, llm) = orchestrator(vec![
            Ok(HandlerTurn::with_requests(vec![ToolRequest::new(
                "l1",
                LOOKUP_CUSTOMER,
                json!({"name": "Lisa", "phone": "+1122334455"}),
            )])),
            Ok(HandlerTurn::text("Which is the name of your dog?")),
        ]);
        let out = orch
            .handle_user_input("t1", "Lisa, +1122334455")
            .await
            .unwrap();
        assert_eq!(out.reply.as_deref(), Some("Which is the name of your dog?"));
        assert_eq!(llm.requests().len(), 2);
        let state = orch.snapshot("t1").await.unwrap().unwrap();
        assert_eq!(state.log().len(), 4);
        assert!(state.log().turns()[2]
            .as_tool_result()
            .is_some_and(|r| r.payload.contains("security question")));
    }

    #[tokio::test]
    async fn test_completion_failure_leaves_store_untouched() {
        let (orch, _) = orchestrator(vec![
            Ok(HandlerTurn::text("Hi!")),
            Err(LlmError::Network("down".to_string())),
        ]);
        orch.handle_user_input("t1", "hello").await.unwrap();
        let before = orch.snapshot("t1").await.unwrap();

        let err = orch.handle_user_input("t1", "again").await.unwrap_err();
        assert!(matches!(err, AgentError::Completion(_)));
        assert_eq!(orch.snapshot("t1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_start_thread_seeds_greeting_once() {
        let (orch, _) = orchestrator(Vec::new());
        let greeting = orch.start_thread("t1").await.unwrap();
        assert_eq!(greeting, orch.greeting());
        orch.start_thread("t1").await.unwrap();
        let state = orch.snapshot("t1").await.unwrap().unwrap();
        assert_eq!(state.log().len(), 1);
        assert_eq!(state.log().latest_handler_text(), Some(GREETING));
    }

    #[tokio::test]
    async fn test_step_limit_stops_runaway_loop() {
        let lookup = || {
            Ok(HandlerTurn::with_requests(vec![ToolRequest::new(
                "l",
                LOOKUP_CUSTOMER,
                json!({"name": "Nobody", "phone": "0"}),
            )]))
        };
        let (orch, llm) = orchestrator((0..10).map(|_| lookup()).collect());
        let orch = orch.with_max_steps(3);
        let out = orch.handle_user_input("t1", "loop").await.unwrap();
        assert!(!out.ended);
        assert_eq!(llm.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_lock_table_is_empty_after_passes() {
        let (orch, _) = orchestrator(Vec::new());
        for i in 0..50 {
            orch.handle_user_input(&format!("t{i}"), "hi").await.unwrap();
        }
        orch.start_thread("greeted").await.unwrap();
        orch.compact_thread("t0").await.unwrap();
        assert!(orch.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_lock_table_released_after_failed_pass() {
        let (orch, _) = orchestrator(vec![Err(LlmError::Network("down".to_string()))]);
        assert!(orch.handle_user_input("t1", "hello").await.is_err());
        assert!(orch.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_passes_share_then_release_lock() {
        let (orch, _) = orchestrator(Vec::new());
        let orch = Arc::new(orch);
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let orch = orch.clone();
                tokio::spawn(async move {
                    orch.handle_user_input("shared", &format!("msg {i}")).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        let state = orch.snapshot("shared").await.unwrap().unwrap();
        assert_eq!(state.log().len(), 16);
        assert!(orch.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_compact_thread_folds_stored_history() {
        let (orch, store) =
            compacting_orchestrator(vec![Ok(HandlerTurn::text("Lisa asked to verify."))]);
        store.save(&long_thread("t1")).await.unwrap();

        let report = orch.compact_thread("t1").await.unwrap().unwrap();
        assert_eq!(report.dropped, 4);
        assert_eq!(report.retained, 3);

        let state = orch.snapshot("t1").await.unwrap().unwrap();
        assert_eq!(state.summary(), Some("Lisa asked to verify."));
        assert_eq!(state.log().len(), 3);
        assert!(!state.log().has_orphan_results());
        assert!(state.log().turns()[0]
            .as_handler()
            .is_some_and(|h| h.contains_request("l1")));
    }

    #[tokio::test]
    async fn test_compact_thread_without_drops_or_thread() {
        let (orch, store) = compacting_orchestrator(Vec::new());
        assert_eq!(orch.compact_thread("missing").await.unwrap(), None);

        let mut short = ConversationState::new("t1");
        short.push_turn(Turn::user("hello"));
        short.push_turn(Turn::handler_text("Hi!"));
        store.save(&short).await.unwrap();

        let report = orch.compact_thread("t1").await.unwrap().unwrap();
        assert_eq!(report.dropped, 0);
        assert_eq!(store.load("t1").await.unwrap(), Some(short));
    }

    #[tokio::test]
    async fn test_compact_thread_completion_error_keeps_store() {
        let (orch, store) =
            compacting_orchestrator(vec![Err(LlmError::Network("down".to_string()))]);
        let original = long_thread("t1");
        store.save(&original).await.unwrap();

        let err = orch.compact_thread("t1").await.unwrap_err();
        assert!(matches!(err, AgentError::Completion(_)));
        assert_eq!(store.load("t1").await.unwrap(), Some(original));
    }

    #[tokio::test]
    async fn test_compact_thread_without_compactor_is_noop() {
        let (orch, _) = orchestrator(vec![Ok(HandlerTurn::text("Hi!"))]);
        orch.handle_user_input("t1", "hello").await.unwrap();
        assert_eq!(orch.compact_thread("t1").await.unwrap(), None);
    }
}
