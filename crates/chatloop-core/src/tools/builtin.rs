//! Built-in calculation tools
//!
//! Small local tools that are handy for exercising the loop end to end
//! without a remote server: the CLI can register them directly or serve
//! them over MCP.

use std::sync::Arc;

use serde_json::{json, Value};

use super::{BoxFuture, Tool, ToolOutput, ToolRegistry};
use crate::error::{Result, ToolError};

/// Add two integers
pub struct AddTwoNumbers;

impl Tool for AddTwoNumbers {
    fn name(&self) -> &str {
        "add_two_numbers"
    }

    fn description(&self) -> &str {
        "Add two numbers. Returns the integer sum of a and b."
    }

    fn parameters_schema(&self) -> Value {
        crate::tool_params!(
            a: "integer" => "The first integer number",
            b: "integer" => "The second integer number",
        )
    }

    fn execute(&self, params: Value) -> BoxFuture<'_, std::result::Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let a = integer_param(&params, "a")?;
            let b = integer_param(&params, "b")?;
            let sum = a
                .checked_add(b)
                .ok_or_else(|| ToolError::invocation(self.name(), "integer overflow"))?;
            Ok(ToolOutput::success(sum))
        })
    }
}

/// Greet the user, optionally by name
pub struct Greet {
    server_name: String,
}

impl Greet {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
        }
    }
}

impl Default for Greet {
    fn default() -> Self {
        Self::new("chatloop")
    }
}

impl Tool for Greet {
    fn name(&self) -> &str {
        "greet"
    }

    fn description(&self) -> &str {
        "Greets the user"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Name of the person to greet" }
            }
        })
    }

    fn execute(&self, params: Value) -> BoxFuture<'_, std::result::Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let greeting = match params.get("name").and_then(|v| v.as_str()) {
                Some(name) if !name.trim().is_empty() => {
                    format!("Hi {}, I am {}", name.trim(), self.server_name)
                }
                _ => format!("Hi, I am {}", self.server_name),
            };
            Ok(ToolOutput::success(greeting))
        })
    }
}

/// Models often send numbers as strings; accept both
fn integer_param(params: &Value, key: &str) -> std::result::Result<i64, ToolError> {
    match params.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| ToolError::InvalidParams(format!("'{}' must be an integer", key))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| ToolError::InvalidParams(format!("'{}' must be an integer, got {:?}", key, s))),
        Some(_) => Err(ToolError::InvalidParams(format!("'{}' must be an integer", key))),
        None => Err(ToolError::InvalidParams(format!("missing required parameter '{}'", key))),
    }
}

/// Register every built-in tool
pub fn register_builtin_tools(registry: &mut ToolRegistry) -> Result<()> {
    registry.register(Arc::new(AddTwoNumbers))?;
    registry.register(Arc::new(Greet::default()))?;
    Ok(())
}
