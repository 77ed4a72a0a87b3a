//! MCP (Model Context Protocol) Server Manager
//!
//! Connects to MCP servers, discovers their tools, and routes tool calls to
//! the server that owns them. Servers are usually subprocesses speaking
//! JSON-RPC over stdio, but any [`Transport`] can be attached.

use std::collections::HashMap;
use std::sync::Arc;

use chatloop_mcp::{ClientInfo, McpClient, ServerInfo, StdioTransport, ToolCallResult, Transport};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{Config, McpServerConfig};
use crate::error::{Error, Result};

/// Information about a tool provided by an MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolInfo {
    /// Tool name as the server knows it
    pub name: String,
    pub description: String,
    /// Input schema (JSON Schema)
    pub input_schema: Value,
    /// Server that provides this tool
    pub server: String,
    /// Register as `mcp__{server}__{tool}`
    #[serde(default)]
    pub prefixed: bool,
}

impl McpToolInfo {
    /// Name the tool is registered under
    pub fn registered_name(&self) -> String {
        if self.prefixed {
            format!(
                "mcp__{}__{}",
                self.server.replace('-', "_"),
                self.name.replace('-', "_")
            )
        } else {
            self.name.clone()
        }
    }
}

struct ConnectedServer {
    client: McpClient<Box<dyn Transport>>,
    info: ServerInfo,
    tools: Vec<McpToolInfo>,
}

/// Manager for MCP server connections
#[derive(Default)]
pub struct McpServerManager {
    servers: RwLock<HashMap<String, Arc<ConnectedServer>>>,
}

impl McpServerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the configured command and connect to it
    pub async fn connect(&self, name: &str, config: &McpServerConfig) -> Result<Vec<McpToolInfo>> {
        let transport = StdioTransport::spawn(&config.command, &config.args, &config.env)
            .await
            .map_err(|e| Error::Mcp(format!("Failed to start MCP server '{}': {}", name, e)))?;

        self.add_transport(name, Box::new(transport), config.prefix_tools)
            .await
    }

    /// Connect every enabled server in `config`; failures are logged and returned
    pub async fn connect_all(&self, config: &Config) -> Vec<(String, Error)> {
        let mut failures = Vec::new();
        for (name, server) in config.enabled_mcp_servers() {
            if let Err(e) = self.connect(name, server).await {
                warn!(server = %name, "MCP server unavailable: {}", e);
                failures.push((name.to_string(), e));
            }
        }
        failures
    }

    /// Initialize a connection over an existing transport and list its tools
    pub async fn add_transport(
        &self,
        name: &str,
        transport: Box<dyn Transport>,
        prefix_tools: bool,
    ) -> Result<Vec<McpToolInfo>> {
        if self.servers.read().contains_key(name) {
            return Err(Error::Mcp(format!("MCP server '{}' is already connected", name)));
        }

        let mut client = McpClient::new(transport);
        let info = client
            .initialize(ClientInfo::new("chatloop", env!("CARGO_PKG_VERSION")))
            .await
            .map_err(|e| Error::Mcp(format!("MCP server '{}' failed to initialize: {}", name, e)))?;

        let tools: Vec<McpToolInfo> = client
            .list_tools()
            .await
            .map_err(|e| Error::Mcp(format!("Failed to list tools from '{}': {}", name, e)))?
            .into_iter()
            .map(|tool| McpToolInfo {
                name: tool.name,
                description: tool.description,
                input_schema: tool.input_schema,
                server: name.to_string(),
                prefixed: prefix_tools,
            })
            .collect();

        info!(
            server = %name,
            remote = %info.name,
            tools = tools.len(),
            "Connected MCP server"
        );

        let connected = Arc::new(ConnectedServer {
            client,
            info,
            tools: tools.clone(),
        });
        self.servers.write().insert(name.to_string(), connected);

        Ok(tools)
    }

    /// Names of connected servers, sorted
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.servers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Name the remote end reported during `initialize`
    pub fn server_info(&self, name: &str) -> Option<ServerInfo> {
        self.servers.read().get(name).map(|s| s.info.clone())
    }

    /// Tools from every connected server, ordered by server then tool name
    pub fn tools(&self) -> Vec<McpToolInfo> {
        let servers = self.servers.read();
        let mut tools: Vec<_> = servers.values().flat_map(|s| s.tools.iter().cloned()).collect();
        tools.sort_by(|a, b| (&a.server, &a.name).cmp(&(&b.server, &b.name)));
        tools
    }

    fn server(&self, name: &str) -> Result<Arc<ConnectedServer>> {
        self.servers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Mcp(format!("MCP server '{}' is not connected", name)))
    }

    /// Call a tool on a specific server
    pub async fn call_tool(&self, server: &str, tool: &str, arguments: Value) -> Result<ToolCallResult> {
        let connected = self.server(server)?;
        connected
            .client
            .call_tool(tool, arguments)
            .await
            .map_err(|e| Error::Mcp(format!("'{}' on '{}': {}", tool, server, e)))
    }

    /// Liveness check for one server
    pub async fn ping(&self, server: &str) -> Result<()> {
        let connected = self.server(server)?;
        connected
            .client
            .ping()
            .await
            .map_err(|e| Error::Mcp(format!("ping '{}': {}", server, e)))
    }

    /// Close every connection; subprocesses are killed
    pub async fn shutdown(&self) {
        let servers: Vec<_> = self.servers.write().drain().collect();
        for (name, server) in servers {
            if let Err(e) = server.client.close().await {
                warn!(server = %name, "Error closing MCP server: {}", e);
            }
        }
    }
}
