//! Conversation state
//!
//! The transcript of one conversation: user queries, assistant turns
//! (final answers and recorded tool-call intents) and tool results.
//! It only ever grows; messages are never edited once appended.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ToolError};
use crate::tools::ToolInvocationRequest;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
}

/// Message body: plain text or a structured payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Json(Value),
}

impl MessageContent {
    /// Render as text for endpoints that only accept strings
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Json(Value::String(s)) => s.clone(),
            Self::Json(v) => v.to_string(),
        }
    }
}

impl From<Value> for MessageContent {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Text(s),
            other => Self::Json(other),
        }
    }
}

/// A message in the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique ID for this message
    pub id: String,
    pub role: Role,
    pub content: MessageContent,
    /// Tool this message calls or reports on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Set on tool results that carry an error description
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: MessageContent, tool_name: Option<String>, is_error: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            tool_name,
            is_error,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(content.into()), None, false)
    }

    /// Create a final assistant answer
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(content.into()), None, false)
    }

    /// Record the model's intent to call a tool
    pub fn tool_call(request: &ToolInvocationRequest) -> Self {
        let content = serde_json::json!({
            "tool_call": {
                "name": request.name,
                "arguments": request.arguments,
            }
        });
        Self::new(
            Role::Assistant,
            MessageContent::Json(content),
            Some(request.name.clone()),
            false,
        )
    }

    /// Successful tool output
    pub fn tool_result(tool_name: impl Into<String>, payload: Value) -> Self {
        Self::new(Role::ToolResult, payload.into(), Some(tool_name.into()), false)
    }

    /// Failed tool call; the description goes to the model verbatim
    pub fn tool_error(tool_name: impl Into<String>, error: &ToolError) -> Self {
        let content = serde_json::json!({
            "error": error.kind(),
            "message": error.to_string(),
        });
        Self::new(
            Role::ToolResult,
            MessageContent::Json(content),
            Some(tool_name.into()),
            true,
        )
    }

    /// The recorded call, if this is an assistant tool-call message
    pub fn as_tool_call(&self) -> Option<ToolInvocationRequest> {
        if self.role != Role::Assistant {
            return None;
        }
        let MessageContent::Json(value) = &self.content else {
            return None;
        };
        let call = value.get("tool_call")?;
        Some(ToolInvocationRequest {
            name: call.get("name")?.as_str()?.to_string(),
            arguments: call.get("arguments")?.as_object()?.clone(),
        })
    }

    pub fn is_tool_call(&self) -> bool {
        self.as_tool_call().is_some()
    }
}

/// Append-only transcript for one conversation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message to the end of the transcript
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Owned copy of the transcript; later appends are not visible through it
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Persist the transcript as pretty-printed JSON
    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a transcript previously written by [`save_json`](Self::save_json)
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
