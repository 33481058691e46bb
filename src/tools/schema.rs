//! 工具参数 JSON Schema 生成（schemars 自动生成）
//!
//! 参数结构体同时用于反序列化 ToolRequest.arguments 与生成提供给模型的 schema，保证两者一致。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::tools::ToolError;

/// 返回参数类型 T 的 JSON Schema（去掉 `$schema` / `title`，便于直接放进 tools 定义）
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

/// 将 ToolRequest 参数解析为具体类型；null 视为空对象
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}
