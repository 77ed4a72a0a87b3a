//! MCP Server implementation
//!
//! [`McpServer`] answers JSON-RPC requests by delegating to an
//! [`McpHandler`]. Tool failures are not protocol errors: they come back as a
//! normal `tools/call` result with `isError: true`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::protocol::{self, methods, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::transport::Transport;
use crate::{
    McpPrompt, McpResource, McpTool, PromptsCapability, ResourcesCapability, ServerCapabilities,
    ToolsCapability, PROTOCOL_VERSION,
};

/// Application-defined JSON-RPC error code for handler failures
const HANDLER_ERROR: i64 = -32000;

/// Handler for MCP requests
///
/// Only the tool methods are required; resources and prompts default to empty.
#[async_trait]
pub trait McpHandler: Send + Sync {
    async fn list_tools(&self) -> Vec<McpTool>;

    /// Run a tool; `Err` text is sent back as an `isError` result
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, String>;

    async fn list_resources(&self) -> Vec<McpResource> {
        Vec::new()
    }

    async fn read_resource(&self, uri: &str) -> Result<ResourceContent, String> {
        Err(format!("Unknown resource: {}", uri))
    }

    async fn list_prompts(&self) -> Vec<McpPrompt> {
        Vec::new()
    }

    async fn get_prompt(&self, name: &str, _arguments: HashMap<String, String>) -> Result<PromptContent, String> {
        Err(format!("Unknown prompt: {}", name))
    }
}

/// Body of a `resources/read` result entry
#[derive(Debug, Clone, Serialize)]
pub struct ResourceContent {
    pub uri: String,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Result of `prompts/get`
#[derive(Debug, Clone, Serialize)]
pub struct PromptContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub messages: Vec<PromptMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: TextContent,
}

impl PromptMessage {
    pub fn text(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: TextContent {
                kind: "text".to_string(),
                text: text.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

#[derive(Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Deserialize)]
struct ResourceReadParams {
    uri: String,
}

#[derive(Deserialize)]
struct PromptGetParams {
    name: String,
    #[serde(default)]
    arguments: HashMap<String, String>,
}

type MethodResult = Result<Value, JsonRpcError>;

/// Decode required params, mapping anything unusable to `-32602`
fn params<P: DeserializeOwned>(params: Option<Value>) -> Result<P, JsonRpcError> {
    let value = params.ok_or_else(JsonRpcError::invalid_params)?;
    serde_json::from_value(value).map_err(|e| JsonRpcError::new(-32602, format!("Invalid params: {}", e)))
}

/// MCP Server
pub struct McpServer<H: McpHandler> {
    handler: Arc<H>,
    capabilities: ServerCapabilities,
    server_name: String,
    server_version: String,
}

impl<H: McpHandler> McpServer<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
                resources: Some(ResourcesCapability {
                    subscribe: false,
                    list_changed: false,
                }),
                prompts: Some(PromptsCapability { list_changed: false }),
            },
            server_name: "chatloop-mcp".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.server_name
    }

    /// Serve requests from `transport` until the peer disconnects
    pub async fn serve<T: Transport>(&self, transport: &mut T) -> std::io::Result<()> {
        info!(server = %self.server_name, "MCP server listening");

        loop {
            let message = match transport.receive().await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    warn!("Unparseable MCP message: {}", e);
                    transport.send(protocol::parse_error_response(&e)).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if protocol::is_notification(&message) {
                debug!(method = ?message.get("method"), "MCP notification received");
                continue;
            }

            let response = match serde_json::from_value::<JsonRpcRequest>(message.clone()) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    // Without a usable id there is nobody to answer
                    let Some(id) = message
                        .get("id")
                        .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok())
                    else {
                        warn!("Dropping malformed MCP message: {}", e);
                        continue;
                    };
                    JsonRpcResponse::error(id, JsonRpcError::invalid_request())
                }
            };

            transport.send(serde_json::to_value(&response)?).await?;
        }

        info!(server = %self.server_name, "MCP client disconnected");
        Ok(())
    }

    /// Handle a JSON-RPC request
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!(method = %request.method, id = %request.id, "Handling MCP request");

        let JsonRpcRequest { id, method, params: raw, .. } = request;
        let outcome = match method.as_str() {
            methods::INITIALIZE => Ok(self.initialize_result()),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => Ok(json!({ "tools": self.handler.list_tools().await })),
            methods::TOOLS_CALL => self.call_tool(raw).await,
            methods::RESOURCES_LIST => Ok(json!({ "resources": self.handler.list_resources().await })),
            methods::RESOURCES_READ => self.read_resource(raw).await,
            methods::PROMPTS_LIST => Ok(json!({ "prompts": self.handler.list_prompts().await })),
            methods::PROMPTS_GET => self.get_prompt(raw).await,
            _ => Err(JsonRpcError::method_not_found()),
        };

        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::error(id, error),
        }
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": self.capabilities,
            "serverInfo": {
                "name": self.server_name,
                "version": self.server_version
            }
        })
    }

    async fn call_tool(&self, raw: Option<Value>) -> MethodResult {
        let ToolCallParams { name, arguments } = params(raw)?;
        let arguments = arguments.unwrap_or_else(|| Value::Object(Default::default()));

        let (text, is_error) = match self.handler.call_tool(&name, arguments).await {
            // Plain strings go out unquoted
            Ok(Value::String(s)) => (s, false),
            Ok(other) => (other.to_string(), false),
            Err(message) => {
                debug!(tool = %name, "Tool reported error: {}", message);
                (message, true)
            }
        };

        Ok(json!({
            "content": [{ "type": "text", "text": text }],
            "isError": is_error
        }))
    }

    async fn read_resource(&self, raw: Option<Value>) -> MethodResult {
        let ResourceReadParams { uri } = params(raw)?;
        let content = self
            .handler
            .read_resource(&uri)
            .await
            .map_err(|e| JsonRpcError::new(HANDLER_ERROR, format!("Resource error: {}", e)))?;
        Ok(json!({ "contents": [content] }))
    }

    async fn get_prompt(&self, raw: Option<Value>) -> MethodResult {
        let PromptGetParams { name, arguments } = params(raw)?;
        let prompt = self
            .handler
            .get_prompt(&name, arguments)
            .await
            .map_err(|e| JsonRpcError::new(HANDLER_ERROR, format!("Prompt error: {}", e)))?;
        serde_json::to_value(prompt).map_err(|e| JsonRpcError::new(-32603, e.to_string()))
    }
}
