//! 专家转接工具：route_to_expert
//!
//! 类别不合法时返回普通文本说明，让处理器重新分类，而不是报故障。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::{parameters_schema, parse_args};
use crate::tools::{Tool, ToolError, ROUTE_TO_EXPERT};

/// (类别, 部门联系方式)
pub const EXPERT_DEPARTMENTS: &[(&str, &str)] = &[
    (
        "yacht_insurance",
        "Yacht & Marine Insurance department at +1999888001",
    ),
    (
        "wealth_management",
        "Wealth Management & Advisory department at +1999888002",
    ),
    ("real_estate", "Real Estate Services department at +1999888003"),
    (
        "general_premium",
        "Premium General Support department at +1999888004",
    ),
];

#[derive(Debug, Deserialize, JsonSchema)]
struct ExpertArgs {
    /// One of "yacht_insurance", "wealth_management", "real_estate", "general_premium"
    category: String,
}

pub struct RouteToExpertTool;

#[async_trait]
impl Tool for RouteToExpertTool {
    fn name(&self) -> &str {
        ROUTE_TO_EXPERT
    }

    fn description(&self) -> &str {
        "Routes the premium customer to the appropriate expert department by category."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<ExpertArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: ExpertArgs = parse_args(args)?;
        let category = args.category.trim();
        match EXPERT_DEPARTMENTS.iter().find(|(c, _)| *c == category) {
            Some((_, contact)) => Ok(format!(
                "Routing customer to {}. Please inform the customer.",
                contact
            )),
            None => {
                let valid: Vec<&str> = EXPERT_DEPARTMENTS.iter().map(|(c, _)| *c).collect();
                Ok(format!(
                    "Error: Invalid category '{}'. Must be one of: {}",
                    category,
                    valid.join(", ")
                ))
            }
        }
    }
}
