//! 身份核验工具：lookup_customer、verify_answer
//!
//! 至少需要两项识别信息（姓名 / 电话 / IBAN），且所有提供的信息必须指向同一条记录。
//! 查无此人、答案错误、信息不足都是普通文本结果；只有目录不可用等基础设施问题才返回 ToolError。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::directory::{CustomerDirectory, CustomerProfile, CustomerQuery};
use crate::tools::schema::{parameters_schema, parse_args};
use crate::tools::{Tool, ToolError, LOOKUP_CUSTOMER, SUCCESS_MARKER, VERIFY_ANSWER};

/// 至少需要的识别信息数量
const MIN_IDENTIFIERS: usize = 2;

pub const NOT_FOUND: &str = "Customer not found.";
pub const INCORRECT_ANSWER: &str = "Incorrect answer";

#[derive(Debug, Deserialize, JsonSchema)]
struct LookupArgs {
    /// Customer full name
    name: Option<String>,
    /// Customer phone number
    phone: Option<String>,
    /// Customer IBAN
    iban: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct VerifyArgs {
    /// Same customer name used for lookup
    name: Option<String>,
    /// Same phone number used for lookup
    phone: Option<String>,
    /// Same IBAN used for lookup
    iban: Option<String>,
    /// The customer's answer to the security question
    answer: String,
}

fn insufficient_details(query: &CustomerQuery) -> Option<String> {
    if query.provided() >= MIN_IDENTIFIERS {
        return None;
    }
    Some(format!(
        "Insufficient details: {} of name, phone, IBAN provided; at least {} are required.",
        query.provided(),
        MIN_IDENTIFIERS
    ))
}

/// 查找客户并返回安全问题
pub struct LookupCustomerTool {
    directory: Arc<CustomerDirectory>,
}

impl LookupCustomerTool {
    pub fn new(directory: Arc<CustomerDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Tool for LookupCustomerTool {
    fn name(&self) -> &str {
        LOOKUP_CUSTOMER
    }

    fn description(&self) -> &str {
        "Searches for the customer using at least two of: name, phone, IBAN. If found, returns the security question."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<LookupArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: LookupArgs = parse_args(args)?;
        let query = CustomerQuery {
            name: args.name,
            phone: args.phone,
            iban: args.iban,
        };
        if let Some(msg) = insufficient_details(&query) {
            return Ok(msg);
        }
        Ok(match self.directory.find_customer(&query)? {
            Some(c) => format!("Customer found. Ask this security question: {}", c.secret),
            None => NOT_FOUND.to_string(),
        })
    }
}

/// 校验安全问题答案；成功时返回包含成功标记的 JSON
pub struct VerifyAnswerTool {
    directory: Arc<CustomerDirectory>,
}

impl VerifyAnswerTool {
    pub fn new(directory: Arc<CustomerDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Tool for VerifyAnswerTool {
    fn name(&self) -> &str {
        VERIFY_ANSWER
    }

    fn description(&self) -> &str {
        "Checks the answer to the security question, using the same customer details that were used for lookup."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<VerifyArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: VerifyArgs = parse_args(args)?;
        let query = CustomerQuery {
            name: args.name,
            phone: args.phone,
            iban: args.iban,
        };
        if let Some(msg) = insufficient_details(&query) {
            return Ok(msg);
        }
        let Some(customer) = self.directory.find_customer(&query)? else {
            return Ok(NOT_FOUND.to_string());
        };

        let expected = customer.answer.trim();
        if !expected.is_empty() && args.answer.trim().to_lowercase() == expected.to_lowercase() {
            let payload = serde_json::json!({
                "status": SUCCESS_MARKER,
                "user_data": CustomerProfile::from(&customer),
            });
            Ok(payload.to_string())
        } else {
            Ok(INCORRECT_ANSWER.to_string())
        }
    }
}
