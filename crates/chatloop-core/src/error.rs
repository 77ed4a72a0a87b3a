//! Error types for Chatloop Core
//!
//! Two layers: [`ToolError`] covers anything that goes wrong while servicing
//! a single tool call and is written back into the transcript for the model
//! to react to. [`Error`] ends the current run and reaches the caller.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using Chatloop Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that terminate a run (or startup)
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid model turn: {0}")]
    InvalidTurn(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model did not respond within {0:?}")]
    ModelTimeout(Duration),

    #[error("Model requested {count} tool calls in one turn; only one is supported")]
    MultipleToolCalls { count: usize },

    #[error("Exceeded the limit of {limit} consecutive tool-call rounds")]
    MaxRoundsExceeded { limit: usize },

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the run failed because of the model endpoint rather than the turn
    pub fn is_model_failure(&self) -> bool {
        matches!(self, Self::ModelUnavailable(_) | Self::ModelTimeout(_))
    }
}

/// Errors raised while servicing one tool call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool '{tool}' failed: {message}")]
    Invocation { tool: String, message: String },

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Tool '{tool}' timed out after {after:?}")]
    Timeout { tool: String, after: Duration },
}

impl ToolError {
    pub fn invocation(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invocation {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Short machine-readable tag recorded alongside the error text
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::Invocation { .. } | Self::InvalidParams(_) => "invocation_error",
            Self::Timeout { .. } => "timeout",
        }
    }
}
