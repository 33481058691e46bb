//! 分诊工具：check_account_status、handoff_to_specialist

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::directory::CustomerDirectory;
use crate::tools::schema::{parameters_schema, parse_args};
use crate::tools::{Tool, ToolError, CHECK_ACCOUNT_STATUS, HANDOFF_TO_SPECIALIST};

#[derive(Debug, Deserialize, JsonSchema)]
struct AccountArgs {
    /// The customer's IBAN
    iban: String,
}

/// 按 IBAN 查询账户等级：Premium / Regular / Non-Client
pub struct CheckAccountStatusTool {
    directory: Arc<CustomerDirectory>,
}

impl CheckAccountStatusTool {
    pub fn new(directory: Arc<CustomerDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Tool for CheckAccountStatusTool {
    fn name(&self) -> &str {
        CHECK_ACCOUNT_STATUS
    }

    fn description(&self) -> &str {
        "Checks the account status (Premium, Regular, or Non-Client) based on the IBAN."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<AccountArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: AccountArgs = parse_args(args)?;
        let status = self.directory.account_status(&args.iban)?;
        Ok(status.as_str().to_string())
    }
}

/// 转交给专家处理器（转交类工具）
pub struct HandoffToSpecialistTool;

#[async_trait]
impl Tool for HandoffToSpecialistTool {
    fn name(&self) -> &str {
        HANDOFF_TO_SPECIALIST
    }

    fn description(&self) -> &str {
        "Hands off the conversation to the Specialist for high-value requests of Premium clients (e.g. yacht insurance, wealth management, real estate)."
    }

    fn is_handoff(&self) -> bool {
        true
    }

    async fn execute(&self, _args: Value) -> Result<String, ToolError> {
        Ok("Handing off to Specialist.".to_string())
    }
}
