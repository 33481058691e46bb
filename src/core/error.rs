//! 编排错误类型
//!
//! 只有基础设施类失败（补全服务、检查点存储、配置、客户目录加载）会离开一次编排；
//! 工具故障、查无此人、核验失败、锁定都在编排内部被消化为 ToolResultTurn 或终止状态。

use thiserror::Error;

use crate::llm::LlmError;
use crate::memory::CheckpointError;

/// 一次编排（pass）对调用方可见的失败
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Completion failed: {0}")]
    Completion(#[from] LlmError),

    #[error("Checkpoint failed: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Customer directory error: {0}")]
    Directory(String),
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        AgentError::Config(e.to_string())
    }
}
