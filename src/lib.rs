//! Concierge - 客服会话编排核心
//!
//! 模块划分：
//! - **agent**: 运行时装配（按配置构建 Orchestrator）
//! - **agents**: 三个处理器（Verifier / Triage / Escalation）的指令、能力集与调用契约
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 会话状态、分派、路由决策表、主控循环
//! - **llm**: 补全服务抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 消息日志、历史压缩、检查点持久化
//! - **observability**: 日志初始化
//! - **tools**: 工具注册表与执行器、客户目录、业务工具

pub mod agent;
pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;

pub use crate::core::{AgentError, ConversationState, HandlerKind, Orchestrator, PassOutcome};
