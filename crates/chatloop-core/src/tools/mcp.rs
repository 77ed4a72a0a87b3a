//! MCP Tool Wrapper
//!
//! Exposes each tool of a connected MCP server as a [`Tool`], so remote
//! tools are registered and invoked like local ones. [`RegistryHandler`]
//! goes the other way and serves a local registry to MCP clients.

use std::sync::Arc;

use async_trait::async_trait;
use chatloop_mcp::{McpHandler, McpTool};
use serde_json::Value;

use super::{BoxFuture, Tool, ToolInvocationRequest, ToolOutput, ToolRegistry};
use crate::error::{Result, ToolError};
use crate::mcp_manager::{McpServerManager, McpToolInfo};

/// Wrapper that exposes an MCP tool as a Chatloop tool
pub struct McpToolWrapper {
    tool_info: McpToolInfo,
    manager: Arc<McpServerManager>,
    registered_name: String,
}

impl McpToolWrapper {
    pub fn new(tool_info: McpToolInfo, manager: Arc<McpServerManager>) -> Self {
        let registered_name = tool_info.registered_name();
        Self {
            tool_info,
            manager,
            registered_name,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.tool_info.server
    }

    /// Tool name on the server, without any prefix
    pub fn original_name(&self) -> &str {
        &self.tool_info.name
    }
}

impl Tool for McpToolWrapper {
    fn name(&self) -> &str {
        &self.registered_name
    }

    fn description(&self) -> &str {
        &self.tool_info.description
    }

    fn parameters_schema(&self) -> Value {
        self.tool_info.input_schema.clone()
    }

    fn execute(&self, params: Value) -> BoxFuture<'_, std::result::Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let result = self
                .manager
                .call_tool(&self.tool_info.server, &self.tool_info.name, params)
                .await
                .map_err(|e| ToolError::invocation(&self.registered_name, e.to_string()))?;

            let text = result.text();
            if result.is_error {
                let message = if text.is_empty() {
                    "MCP tool execution failed".to_string()
                } else {
                    text
                };
                return Ok(ToolOutput::error(message));
            }

            Ok(ToolOutput::success(decode_payload(text))
                .with_metadata("mcp_server", self.tool_info.server.clone())
                .with_metadata("mcp_tool", self.tool_info.name.clone()))
        })
    }
}

/// Text that is itself JSON (numbers, objects) is passed on structured
fn decode_payload(text: String) -> Value {
    match serde_json::from_str::<Value>(&text) {
        Ok(value) if !value.is_string() => value,
        _ => Value::String(text),
    }
}

/// Register a wrapper for every tool the manager has discovered
pub fn register_mcp_tools(registry: &mut ToolRegistry, manager: &Arc<McpServerManager>) -> Result<usize> {
    let tools = manager.tools();
    let count = tools.len();
    for info in tools {
        registry.register(Arc::new(McpToolWrapper::new(info, manager.clone())))?;
    }
    Ok(count)
}

/// MCP handler backed by a [`ToolRegistry`]
pub struct RegistryHandler {
    registry: Arc<ToolRegistry>,
}

impl RegistryHandler {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl McpHandler for RegistryHandler {
    async fn list_tools(&self) -> Vec<McpTool> {
        self.registry
            .schemas()
            .into_iter()
            .map(|definition| McpTool {
                name: definition.name,
                description: definition.description,
                input_schema: definition.parameters,
            })
            .collect()
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> std::result::Result<Value, String> {
        let request = ToolInvocationRequest::new(name, arguments);
        self.registry
            .invoke(&request)
            .await
            .map(|result| result.payload)
            .map_err(|e| e.to_string())
    }
}
