//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CONCIERGE__*` 覆盖（双下划线表示嵌套，如 `CONCIERGE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub verification: VerificationSection,
    pub compaction: CompactionSection,
    pub prompts: PromptsSection,
}

/// [app] 段：应用名、客户目录、检查点位置、单次 pass 步数上限
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    #[serde(default = "default_customer_data_path")]
    pub customer_data_path: PathBuf,
    /// SQLite 检查点文件；未设置时使用内存存储
    pub checkpoint_path: Option<PathBuf>,
    #[serde(default = "default_max_steps_per_pass")]
    pub max_steps_per_pass: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            customer_data_path: default_customer_data_path(),
            checkpoint_path: None,
            max_steps_per_pass: default_max_steps_per_pass(),
        }
    }
}

fn default_customer_data_path() -> PathBuf {
    PathBuf::from("data/customers.json")
}

fn default_max_steps_per_pass() -> usize {
    12
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            temperature: 0.0,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [tools] 段：工具超时
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [verification] 段：锁定阈值
#[derive(Debug, Clone, Deserialize)]
pub struct VerificationSection {
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,
}

impl Default for VerificationSection {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_failed_attempts(),
        }
    }
}

fn default_max_failed_attempts() -> u32 {
    3
}

/// [compaction] 段：历史压缩
#[derive(Debug, Clone, Deserialize)]
pub struct CompactionSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 日志轮数超过该值时压缩
    #[serde(default = "default_compaction_threshold")]
    pub threshold: usize,
    /// 原样保留的最近轮数
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
}

impl Default for CompactionSection {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_compaction_threshold(),
            keep_recent: default_keep_recent(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_compaction_threshold() -> usize {
    24
}

fn default_keep_recent() -> usize {
    2
}

/// [prompts] 段：各处理器指令文件（可选）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PromptsSection {
    pub verifier: Option<PathBuf>,
    pub triage: Option<PathBuf>,
    pub escalation: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 CONCIERGE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CONCIERGE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CONCIERGE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
