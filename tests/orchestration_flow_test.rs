//! 会话编排集成测试：脚本化 Mock LLM + 内存检查点，端到端驱动完整会话

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use concierge::agents::{HandlerSet, CLOSING_MESSAGE};
    use concierge::core::{HandlerKind, Orchestrator, RoutingRules};
    use concierge::llm::{LlmError, MockLlmClient};
    use concierge::memory::{
        CompactionPolicy, HandlerTurn, HistoryCompactor, InMemoryCheckpointStore, ToolRequest,
        Turn,
    };
    use concierge::tools::{
        create_registry, CustomerDirectory, ToolExecutor, CHECK_ACCOUNT_STATUS,
        HANDOFF_TO_SPECIALIST, LOOKUP_CUSTOMER, ROUTE_TO_EXPERT, SUCCESS_MARKER, VERIFY_ANSWER,
    };
    use serde_json::json;

    const DIRECTORY_JSON: &str = r#"{
        "customers": [
            {"name": "Lisa", "phone": "+1122334455", "iban": "DE89370400440532013000",
             "secret": "Which is the name of my dog?", "answer": "Yoda"}
        ],
        "accounts": [
            {"iban": "DE89370400440532013000", "premium": true}
        ]
    }"#;

    struct Harness {
        orch: Arc<Orchestrator>,
        llm: Arc<MockLlmClient>,
        directory: Arc<CustomerDirectory>,
    }

    fn harness(script: Vec<Result<HandlerTurn, LlmError>>, policy: Option<CompactionPolicy>) -> Harness {
        let llm = Arc::new(MockLlmClient::with_script(script));
        let directory = Arc::new(CustomerDirectory::from_json(DIRECTORY_JSON).unwrap());
        let registry = create_registry(directory.clone());
        let handlers = HandlerSet::new(llm.clone(), Vec::new(), &registry);
        let executor = ToolExecutor::new(registry, 5);
        let mut orch = Orchestrator::new(
            handlers,
            executor,
            Arc::new(InMemoryCheckpointStore::new()),
            RoutingRules::default(),
        );
        if let Some(policy) = policy {
            orch = orch.with_compactor(HistoryCompactor::new(llm.clone(), policy));
        }
        Harness {
            orch: Arc::new(orch),
            llm,
            directory,
        }
    }

    fn call(id: &str, name: &str, args: serde_json::Value) -> Result<HandlerTurn, LlmError> {
        Ok(HandlerTurn::with_requests(vec![ToolRequest::new(id, name, args)]))
    }

    fn say(text: &str) -> Result<HandlerTurn, LlmError> {
        Ok(HandlerTurn::text(text))
    }

    fn lookup(id: &str) -> Result<HandlerTurn, LlmError> {
        call(id, LOOKUP_CUSTOMER, json!({"name": "Lisa", "phone": "+1122334455"}))
    }

    fn verify(id: &str, answer: &str) -> Result<HandlerTurn, LlmError> {
        call(
            id,
            VERIFY_ANSWER,
            json!({"name": "Lisa", "phone": "+1122334455", "answer": answer}),
        )
    }

    #[tokio::test]
    async fn test_verify_triage_escalation_flow() {
        let h = harness(
            vec![
                // pass 1: Verifier 查找客户后提问
                lookup("l1"),
                say("Which is the name of your dog?"),
                // pass 2: 核验成功后直接进入 Triage
                verify("v1", "Yoda"),
                say("Welcome back, Lisa! How can I help you today?"),
                // pass 3: Triage 查询等级并转交，Escalation 转接专家
                call("s1", CHECK_ACCOUNT_STATUS, json!({"iban": "DE89370400440532013000"})),
                Ok(HandlerTurn {
                    text: "Transferring you now.".to_string(),
                    tool_requests: vec![ToolRequest::new("h1", HANDOFF_TO_SPECIALIST, json!({}))],
                }),
                call("r1", ROUTE_TO_EXPERT, json!({"category": "yacht_insurance"})),
                say("You are connected to Yacht & Marine Insurance at +1999888001."),
            ],
            None,
        );

        let out = h.orch.handle_user_input("t1", "I'm Lisa, +1122334455").await.unwrap();
        assert_eq!(out.reply.as_deref(), Some("Which is the name of your dog?"));
        assert_eq!(out.active_handler, HandlerKind::Verifier);

        let out = h.orch.handle_user_input("t1", "Yoda").await.unwrap();
        assert_eq!(out.active_handler, HandlerKind::Triage);
        assert!(out.reply.unwrap().starts_with("Welcome back"));
        let state = h.orch.snapshot("t1").await.unwrap().unwrap();
        assert!(state.is_verified());
        assert_eq!(state.failed_verification_attempts(), 0);

        let out = h
            .orch
            .handle_user_input("t1", "I need insurance for my yacht")
            .await
            .unwrap();
        assert_eq!(out.active_handler, HandlerKind::Escalation);
        assert!(out.reply.unwrap().contains("+1999888001"));
        assert!(!out.ended);
        assert_eq!(h.llm.remaining(), 0);

        // 转交轮的文本被清空
        let state = h.orch.snapshot("t1").await.unwrap().unwrap();
        let handoff = state
            .log()
            .turns()
            .iter()
            .filter_map(Turn::as_handler)
            .find(|t| t.tool_requests.iter().any(|r| r.name == HANDOFF_TO_SPECIALIST))
            .unwrap();
        assert!(handoff.text.is_empty());

        // 每个处理器只看到自己的能力集
        let requests = h.llm.requests();
        let tool_names = |i: usize| -> Vec<String> {
            requests[i].tools.iter().map(|t| t.name.clone()).collect()
        };
        assert_eq!(tool_names(0), vec![LOOKUP_CUSTOMER, VERIFY_ANSWER]);
        assert_eq!(tool_names(3), vec![CHECK_ACCOUNT_STATUS, HANDOFF_TO_SPECIALIST]);
        assert_eq!(tool_names(6), vec![ROUTE_TO_EXPERT]);
    }

    #[tokio::test]
    async fn test_success_skips_extra_verifier_turn() {
        let h = harness(
            vec![
                lookup("l1"),
                say("Which is the name of your dog?"),
                verify("v1", "yoda"),
                say("Welcome!"),
            ],
            None,
        );
        h.orch.handle_user_input("t1", "Lisa +1122334455").await.unwrap();
        h.orch.handle_user_input("t1", "yoda").await.unwrap();

        let state = h.orch.snapshot("t1").await.unwrap().unwrap();
        let turns = state.log().turns();
        let result = turns[turns.len() - 2].as_tool_result().unwrap();
        assert!(result.payload.contains(SUCCESS_MARKER));
        // 核验结果之后紧接着的是 Triage 的欢迎语
        assert_eq!(turns[turns.len() - 1].as_handler().unwrap().text, "Welcome!");
        let last_request = h.llm.requests().pop().unwrap();
        assert_eq!(last_request.tools[0].name, CHECK_ACCOUNT_STATUS);
    }

    #[tokio::test]
    async fn test_three_failures_lock_the_thread() {
        let h = harness(
            vec![
                lookup("l1"),
                say("Which is the name of your dog?"),
                verify("v1", "Rex"),
                say("That is not correct, please try again."),
                verify("v2", "Max"),
                say("Still not correct, please try again."),
                verify("v3", "Bob"),
                say("I'm sorry, that is not correct."),
            ],
            None,
        );
        h.orch.handle_user_input("t1", "Lisa +1122334455").await.unwrap();
        for answer in ["Rex", "Max"] {
            let out = h.orch.handle_user_input("t1", answer).await.unwrap();
            assert!(!out.ended);
        }
        let state = h.orch.snapshot("t1").await.unwrap().unwrap();
        assert_eq!(state.failed_verification_attempts(), 2);

        let out = h.orch.handle_user_input("t1", "Bob").await.unwrap();
        assert!(out.ended);
        assert_eq!(out.reply.as_deref(), Some(CLOSING_MESSAGE));
        let state = h.orch.snapshot("t1").await.unwrap().unwrap();
        assert_eq!(state.failed_verification_attempts(), 3);
        assert!(state.is_ended());

        // 已结束的会话不再调用处理器，也不再追加任何轮次
        let calls = h.llm.requests().len();
        let len = state.log().len();
        let out = h.orch.handle_user_input("t1", "Yoda").await.unwrap();
        assert!(out.ended);
        assert_eq!(out.reply, None);
        assert_eq!(h.llm.requests().len(), calls);
        assert_eq!(h.orch.snapshot("t1").await.unwrap().unwrap().log().len(), len);
    }

    #[tokio::test]
    async fn test_tool_fault_becomes_text_result() {
        let h = harness(
            vec![lookup("l1"), say("Our records are unavailable right now, sorry.")],
            None,
        );
        h.directory.close();
        let out = h.orch.handle_user_input("t1", "Lisa +1122334455").await.unwrap();
        assert_eq!(
            out.reply.as_deref(),
            Some("Our records are unavailable right now, sorry.")
        );
        let state = h.orch.snapshot("t1").await.unwrap().unwrap();
        let result = state.log().tool_results().next().unwrap();
        assert!(result.payload.starts_with("Error:"));
        assert_eq!(result.request_id, "l1");
    }

    #[tokio::test]
    async fn test_tool_outside_capability_set_is_refused() {
        let h = harness(
            vec![
                call("x1", ROUTE_TO_EXPERT, json!({"category": "real_estate"})),
                say("Let me first verify your identity."),
            ],
            None,
        );
        h.orch.handle_user_input("t1", "Route me to real estate").await.unwrap();
        let state = h.orch.snapshot("t1").await.unwrap().unwrap();
        let result = state.log().tool_results().next().unwrap();
        assert!(result.payload.contains("not available"));
        assert_eq!(state.active_handler(), HandlerKind::Verifier);
    }

    #[tokio::test]
    async fn test_completion_error_surfaces_and_state_is_kept() {
        let h = harness(
            vec![
                lookup("l1"),
                say("Which is the name of your dog?"),
                verify("v1", "Rex"),
                Err(LlmError::Api {
                    status: 503,
                    body: "overloaded".to_string(),
                }),
            ],
            None,
        );
        h.orch.handle_user_input("t1", "Lisa +1122334455").await.unwrap();
        let before = h.orch.snapshot("t1").await.unwrap();

        assert!(h.orch.handle_user_input("t1", "Rex").await.is_err());
        let after = h.orch.snapshot("t1").await.unwrap();
        assert_eq!(after, before);
        assert_eq!(after.unwrap().failed_verification_attempts(), 0);
    }

    #[tokio::test]
    async fn test_compaction_keeps_request_result_pairs() {
        let h = harness(
            vec![
                // pass 1
                say("Hello, who am I speaking with?"),
                // pass 2
                lookup("l1"),
                say("Which is the name of your dog?"),
                // pass 3：先压缩，再调用处理器
                say("Lisa introduced herself and was asked the security question."),
                say("Please answer the security question."),
            ],
            Some(CompactionPolicy {
                threshold: 4,
                keep_recent: 3,
            }),
        );
        h.orch.handle_user_input("t1", "hi").await.unwrap();
        h.orch.handle_user_input("t1", "Lisa +1122334455").await.unwrap();
        h.orch.handle_user_input("t1", "what?").await.unwrap();

        let state = h.orch.snapshot("t1").await.unwrap().unwrap();
        assert_eq!(
            state.summary(),
            Some("Lisa introduced herself and was asked the security question.")
        );
        assert!(!state.log().has_orphan_results());
        // 保留窗口里的工具结果把它的请求一起带了回来
        let first = state.log().turns()[0].as_handler().unwrap();
        assert_eq!(first.tool_requests[0].id, "l1");
        assert_eq!(state.log().len(), 5);

        // 压缩后的处理器调用带上摘要
        let last = h.llm.requests().pop().unwrap();
        assert!(last.system.iter().any(|s| s.starts_with("Summary of conversation earlier:")));
    }

    #[tokio::test]
    async fn test_compaction_failure_does_not_abort_pass() {
        let h = harness(
            vec![
                say("Hello!"),
                Err(LlmError::Network("summary backend down".to_string())),
                say("How can I help?"),
            ],
            Some(CompactionPolicy {
                threshold: 1,
                keep_recent: 1,
            }),
        );
        h.orch.handle_user_input("t1", "hi").await.unwrap();
        let out = h.orch.handle_user_input("t1", "hello?").await.unwrap();
        assert_eq!(out.reply.as_deref(), Some("How can I help?"));
        let state = h.orch.snapshot("t1").await.unwrap().unwrap();
        assert_eq!(state.summary(), None);
        assert_eq!(state.log().len(), 4);
    }

    #[tokio::test]
    async fn test_counter_survives_compaction() {
        let h = harness(
            vec![
                lookup("l1"),
                say("Which is the name of your dog?"),
                verify("v1", "Rex"),
                say("Wrong, try again."),
                verify("v2", "Max"),
                say("Wrong again."),
                // pass 4：压缩丢掉了之前的失败结果
                say("Two failed verification attempts so far."),
                verify("v3", "Bob"),
                say("Sorry."),
            ],
            Some(CompactionPolicy {
                threshold: 12,
                keep_recent: 1,
            }),
        );
        for input in ["Lisa +1122334455", "Rex", "Max"] {
            h.orch.handle_user_input("t1", input).await.unwrap();
        }
        let out = h.orch.handle_user_input("t1", "Bob").await.unwrap();
        assert!(out.ended);

        let state = h.orch.snapshot("t1").await.unwrap().unwrap();
        assert_eq!(state.failed_verification_attempts(), 3);
        // 日志里只剩一条失败的核验结果，锁定仍然生效
        let failures = state
            .log()
            .tool_results()
            .filter(|r| r.tool_name == VERIFY_ANSWER)
            .count();
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_same_thread_passes_are_serialized() {
        let h = harness(Vec::new(), None);
        let mut handles = Vec::new();
        for i in 0..5 {
            let orch = h.orch.clone();
            handles.push(tokio::spawn(async move {
                orch.handle_user_input("shared", &format!("message {}", i)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let state = h.orch.snapshot("shared").await.unwrap().unwrap();
        assert_eq!(state.log().len(), 10);
        for pair in state.log().turns().chunks(2) {
            let Turn::User { text } = &pair[0] else {
                panic!("expected user turn, got {:?}", pair[0]);
            };
            let reply = pair[1].as_handler().unwrap();
            assert_eq!(reply.text, format!("Echo from Mock: {}", text));
        }
    }

    #[tokio::test]
    async fn test_threads_are_independent() {
        let h = harness(Vec::new(), None);
        let (a, b) = tokio::join!(
            h.orch.handle_user_input("a", "first"),
            h.orch.handle_user_input("b", "second")
        );
        assert_eq!(a.unwrap().reply.as_deref(), Some("Echo from Mock: first"));
        assert_eq!(b.unwrap().reply.as_deref(), Some("Echo from Mock: second"));
        assert_eq!(h.orch.snapshot("a").await.unwrap().unwrap().log().len(), 2);
    }
}
