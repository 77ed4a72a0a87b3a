//! Chatloop Core - tool-calling conversation loop
//!
//! This crate provides the pieces that sit between a language model and a
//! set of callable tools:
//! - Conversation transcript and message types
//! - Tool registry with built-in tools and an MCP bridge
//! - Model clients (Ollama, plus a scripted double for tests)
//! - The tool-calling orchestrator and interactive sessions
//! - Configuration loading

pub mod config;
pub mod conversation;
pub mod error;
#[cfg(feature = "mcp")]
pub mod mcp_manager;
pub mod orchestrator;
pub mod provider;
pub mod session;
pub mod tools;

pub use config::{Config, ConfigManager, McpServerConfig, ModelConfig, OrchestratorSettings};
pub use conversation::{ConversationState, Message, MessageContent, Role};
pub use error::{Error, Result, ToolError};
#[cfg(feature = "mcp")]
pub use mcp_manager::{McpServerManager, McpToolInfo};
pub use orchestrator::{OrchestratorConfig, OrchestratorState, ToolCallOrchestrator};
pub use provider::{ModelClient, ModelResponse, ModelTurn, OllamaClient, RawToolCall, ScriptedModelClient};
pub use session::{DriverStats, Session, SessionDriver, SessionId};
pub use tools::{
    FnTool, Tool, ToolDefinition, ToolInvocationRequest, ToolInvocationResult, ToolOutput, ToolRegistry,
};
#[cfg(feature = "mcp")]
pub use tools::mcp::{register_mcp_tools, McpToolWrapper, RegistryHandler};
pub use tokio_util::sync::CancellationToken;
