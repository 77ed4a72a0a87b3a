//! MCP Client implementation

use std::sync::atomic::{AtomicI64, Ordering};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::protocol::{self, methods, JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::transport::Transport;
use crate::{McpPrompt, McpResource, McpTool, ServerCapabilities, PROTOCOL_VERSION};

/// Client side of one MCP connection
///
/// Requests are serialized through the transport lock, so a client has at
/// most one request in flight.
pub struct McpClient<T: Transport> {
    transport: Mutex<T>,
    next_id: AtomicI64,
    server_capabilities: Option<ServerCapabilities>,
}

impl<T: Transport> McpClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Mutex::new(transport),
            next_id: AtomicI64::new(1),
            server_capabilities: None,
        }
    }

    /// Capabilities reported by the server during `initialize`
    pub fn server_capabilities(&self) -> Option<&ServerCapabilities> {
        self.server_capabilities.as_ref()
    }

    /// Handshake: `initialize`, then the `initialized` notification
    pub async fn initialize(&mut self, client_info: ClientInfo) -> Result<ServerInfo, McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": client_info,
        });
        let result: InitializeResult = self.call(methods::INITIALIZE, Some(params)).await?;

        self.transport
            .lock()
            .await
            .send(protocol::notification(methods::INITIALIZED))
            .await?;

        debug!(
            server = %result.server_info.name,
            protocol = %result.protocol_version,
            "MCP connection initialized"
        );

        self.server_capabilities = Some(result.capabilities);
        Ok(ServerInfo {
            name: result.server_info.name,
            version: result.server_info.version,
            protocol_version: result.protocol_version,
        })
    }

    pub async fn ping(&self) -> Result<(), McpError> {
        let _: Value = self.call(methods::PING, None).await?;
        Ok(())
    }

    pub async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        let result: ToolsList = self.call(methods::TOOLS_LIST, None).await?;
        Ok(result.tools)
    }

    /// Call a tool; a tool-level failure is an `Ok` result with `is_error` set
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let params = json!({ "name": name, "arguments": arguments });
        self.call(methods::TOOLS_CALL, Some(params)).await
    }

    pub async fn list_resources(&self) -> Result<Vec<McpResource>, McpError> {
        let result: ResourcesList = self.call(methods::RESOURCES_LIST, None).await?;
        Ok(result.resources)
    }

    pub async fn list_prompts(&self) -> Result<Vec<McpPrompt>, McpError> {
        let result: PromptsList = self.call(methods::PROMPTS_LIST, None).await?;
        Ok(result.prompts)
    }

    /// Close the underlying transport
    pub async fn close(&self) -> Result<(), McpError> {
        self.transport.lock().await.close().await?;
        Ok(())
    }

    pub fn into_transport(self) -> T {
        self.transport.into_inner()
    }

    /// Send `method` and decode the `result` member of the reply
    async fn call<R: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<R, McpError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut request = JsonRpcRequest::new(id, method);
        request.params = params;

        let response = self.round_trip(request).await?;
        if let Some(error) = response.error {
            return Err(McpError::Server(error.message));
        }
        let result = response
            .result
            .ok_or_else(|| McpError::Protocol(format!("'{}' response has no result", method)))?;
        serde_json::from_value(result).map_err(|e| McpError::Protocol(format!("'{}' result: {}", method, e)))
    }

    async fn round_trip(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        let outgoing = serde_json::to_value(&request).map_err(|e| McpError::Protocol(e.to_string()))?;

        let mut transport = self.transport.lock().await;
        trace!(method = %request.method, id = %request.id, "MCP request");
        transport.send(outgoing).await?;

        // Servers may interleave notifications (logging, progress) before the reply
        loop {
            let incoming = transport
                .receive()
                .await?
                .ok_or_else(|| McpError::Transport("Connection closed".to_string()))?;

            if protocol::is_notification(&incoming) {
                trace!(message = %incoming, "Skipping MCP notification");
                continue;
            }

            let response: JsonRpcResponse =
                serde_json::from_value(incoming).map_err(|e| McpError::Protocol(e.to_string()))?;
            if response.id == request.id {
                return Ok(response);
            }
            debug!(expected = %request.id, got = %response.id, "Discarding stale MCP response");
        }
    }
}

/// Identity sent in `initialize`
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl ClientInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Identity the server returned from `initialize`
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    protocol_version: String,
    #[serde(default)]
    capabilities: ServerCapabilities,
    server_info: Implementation,
}

#[derive(Deserialize)]
struct Implementation {
    name: String,
    #[serde(default)]
    version: String,
}

#[derive(Deserialize)]
struct ToolsList {
    tools: Vec<McpTool>,
}

#[derive(Deserialize)]
struct ResourcesList {
    resources: Vec<McpResource>,
}

#[derive(Deserialize)]
struct PromptsList {
    prompts: Vec<McpPrompt>,
}

/// Result of `tools/call`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// All text items joined by newlines
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|item| item.content_type == "text")
            .filter_map(|item| item.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: Option<String>,
}

/// MCP errors
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Server error: {0}")]
    Server(String),
}

impl From<std::io::Error> for McpError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_call_result_text_joins_text_items() {
        let result: ToolCallResult = serde_json::from_value(json!({
            "content": [
                { "type": "text", "text": "first" },
                { "type": "image", "text": null },
                { "type": "text", "text": "second" }
            ]
        }))
        .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text(), "first\nsecond");
    }

    #[test]
    fn test_initialize_result_shape() {
        let result: InitializeResult = serde_json::from_value(json!({
            "protocolVersion": "2024-11-05",
            "serverInfo": { "name": "calculation-server" }
        }))
        .unwrap();
        assert_eq!(result.server_info.name, "calculation-server");
        assert!(result.server_info.version.is_empty());
        assert!(result.capabilities.tools.is_none());
    }

    #[test]
    fn test_client_info_serializes_flat() {
        let value = serde_json::to_value(ClientInfo::new("chatloop", "0.1.0")).unwrap();
        assert_eq!(value, json!({ "name": "chatloop", "version": "0.1.0" }));
    }
}
