//! 运行时装配
//!
//! 根据配置选择补全后端、加载客户目录、注册工具、读取各处理器指令、选择检查点存储，
//! 最终构建可共享的 Orchestrator，供 REPL 或其他前端调用。

use std::sync::Arc;

use crate::agents::{load_instructions, HandlerProfile, HandlerSet};
use crate::config::AppConfig;
use crate::core::{AgentError, HandlerKind, Orchestrator, RoutingRules};
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::{
    CheckpointStore, CompactionPolicy, HistoryCompactor, InMemoryCheckpointStore,
    SqliteCheckpointStore,
};
use crate::tools::{create_registry, CustomerDirectory, ToolExecutor};

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / DeepSeek / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Result<Arc<dyn LlmClient>, AgentError> {
    let provider = cfg.llm.provider.to_lowercase();
    let temperature = cfg.llm.temperature;
    let timeout = cfg.llm.timeouts.request;

    match provider.as_str() {
        "mock" => {
            tracing::info!("Using Mock LLM");
            Ok(Arc::new(MockLlmClient::new()))
        }
        "deepseek" => {
            let model = Some(cfg.llm.model.as_str()).filter(|m| m.starts_with("deepseek"));
            let client = create_deepseek_client(model, temperature, timeout)?;
            tracing::info!("Using DeepSeek LLM ({})", client.model());
            Ok(Arc::new(client))
        }
        "openai" if std::env::var("OPENAI_API_KEY").is_ok() || cfg.llm.base_url.is_some() => {
            let client = OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                None,
                temperature,
                timeout,
            )?;
            tracing::info!("Using OpenAI-compatible LLM ({})", client.model());
            Ok(Arc::new(client))
        }
        other => {
            tracing::warn!(provider = other, "No API key set or provider unknown, using Mock LLM");
            Ok(Arc::new(MockLlmClient::new()))
        }
    }
}

fn create_store(cfg: &AppConfig) -> Result<Arc<dyn CheckpointStore>, AgentError> {
    match &cfg.app.checkpoint_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Using SQLite checkpoint store");
            Ok(Arc::new(SqliteCheckpointStore::open(path)?))
        }
        None => Ok(Arc::new(InMemoryCheckpointStore::new())),
    }
}

fn handler_profiles(cfg: &AppConfig) -> Vec<HandlerProfile> {
    [
        (HandlerKind::Verifier, cfg.prompts.verifier.as_deref()),
        (HandlerKind::Triage, cfg.prompts.triage.as_deref()),
        (HandlerKind::Escalation, cfg.prompts.escalation.as_deref()),
    ]
    .into_iter()
    .map(|(kind, path)| HandlerProfile::new(kind, load_instructions(kind, path)))
    .collect()
}

/// 用给定的补全服务与客户目录装配编排器
pub fn build_orchestrator_with(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    directory: Arc<CustomerDirectory>,
) -> Result<Orchestrator, AgentError> {
    let registry = create_registry(directory);
    let rules = RoutingRules {
        handoff_tools: registry.handoff_tool_names(),
        max_failed_attempts: cfg.verification.max_failed_attempts,
        ..RoutingRules::default()
    };
    let handlers = HandlerSet::new(llm.clone(), handler_profiles(cfg), &registry);
    let executor = ToolExecutor::new(registry, cfg.tools.tool_timeout_secs);

    let mut orchestrator = Orchestrator::new(handlers, executor, create_store(cfg)?, rules)
        .with_max_steps(cfg.app.max_steps_per_pass);
    if cfg.compaction.enabled {
        orchestrator = orchestrator.with_compactor(HistoryCompactor::new(
            llm,
            CompactionPolicy {
                threshold: cfg.compaction.threshold,
                keep_recent: cfg.compaction.keep_recent,
            },
        ));
    }
    Ok(orchestrator)
}

/// 按配置装配编排器；同时返回客户目录句柄，便于退出时 close
pub fn build_orchestrator(
    cfg: &AppConfig,
) -> Result<(Orchestrator, Arc<CustomerDirectory>), AgentError> {
    let llm = create_llm_from_config(cfg)?;
    let directory = Arc::new(CustomerDirectory::load(&cfg.app.customer_data_path)?);
    let orchestrator = build_orchestrator_with(cfg, llm, directory.clone())?;
    Ok((orchestrator, directory))
}
