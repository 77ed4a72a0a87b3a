//! Model endpoint abstraction
//!
//! A [`ModelClient`] takes the transcript plus the tool schemas and returns
//! one raw [`ModelResponse`]. The orchestrator classifies that response into
//! a [`ModelTurn`]; clients never decide what a response means.

mod ollama;
mod scripted;

pub use ollama::{OllamaClient, DEFAULT_OLLAMA_URL};
pub use scripted::{ScriptedModelClient, ScriptedReply, SeenRequest};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::conversation::Message;
use crate::error::{Error, Result};
use crate::tools::{ToolDefinition, ToolInvocationRequest};

/// Model endpoint
///
/// Transport and decoding failures are reported as
/// [`Error::ModelUnavailable`]; retry policy belongs to the implementation.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Provider name for logging (e.g. "ollama")
    fn name(&self) -> &str;

    /// Produce the next model turn for `transcript`
    async fn generate(&self, transcript: &[Message], tools: &[ToolDefinition]) -> Result<ModelResponse>;
}

/// A tool call exactly as the model emitted it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawToolCall {
    pub name: String,
    /// Usually an object; some endpoints send a JSON-encoded string
    #[serde(default)]
    pub arguments: Value,
}

impl RawToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// One unvalidated model response
///
/// Wire shape: `{"content": "..."}` for an answer,
/// `{"tool_calls": [{"name": "...", "arguments": {...}}]}` for a call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<RawToolCall>,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            content: None,
            tool_calls: vec![RawToolCall::new(name, arguments)],
        }
    }
}

/// A classified model response
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    FinalAnswer(String),
    ToolCall(ToolInvocationRequest),
}

impl ModelTurn {
    /// Classify a response. Only the first tool call is considered; callers
    /// that care about extra calls must check `tool_calls.len()` first.
    pub fn classify(response: ModelResponse) -> Result<ModelTurn> {
        if let Some(call) = response.tool_calls.into_iter().next() {
            let name = call.name.trim();
            if name.is_empty() {
                return Err(Error::InvalidTurn("tool call without a tool name".to_string()));
            }
            let arguments = normalize_arguments(name, call.arguments)?;
            return Ok(ModelTurn::ToolCall(ToolInvocationRequest {
                name: name.to_string(),
                arguments,
            }));
        }

        match response.content {
            Some(text) if !text.trim().is_empty() => Ok(ModelTurn::FinalAnswer(text)),
            _ => Err(Error::InvalidTurn(
                "response has neither content nor a tool call".to_string(),
            )),
        }
    }
}

fn normalize_arguments(tool: &str, arguments: Value) -> Result<Map<String, Value>> {
    match arguments {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        Value::String(encoded) if encoded.trim().is_empty() => Ok(Map::new()),
        Value::String(encoded) => match serde_json::from_str::<Value>(&encoded) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(Error::InvalidTurn(format!(
                "arguments for '{}' are not a JSON object: {}",
                tool, encoded
            ))),
        },
        other => Err(Error::InvalidTurn(format!(
            "arguments for '{}' must be an object, got {}",
            tool, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_is_final_answer() {
        let turn = ModelTurn::classify(ModelResponse::text("5")).unwrap();
        assert_eq!(turn, ModelTurn::FinalAnswer("5".to_string()));
    }

    #[test]
    fn test_tool_call_wins_over_content() {
        let response = ModelResponse {
            content: Some("Let me add those.".to_string()),
            tool_calls: vec![RawToolCall::new("add", json!({ "a": 2, "b": 3 }))],
        };
        match ModelTurn::classify(response).unwrap() {
            ModelTurn::ToolCall(request) => {
                assert_eq!(request.name, "add");
                assert_eq!(request.arguments["a"], json!(2));
            }
            other => panic!("expected tool call, got {:?}", other),
        }
    }

    #[test]
    fn test_string_encoded_arguments_are_decoded() {
        let response = ModelResponse::tool_call("add", json!("{\"a\": 1, \"b\": 2}"));
        let ModelTurn::ToolCall(request) = ModelTurn::classify(response).unwrap() else {
            panic!("expected tool call");
        };
        assert_eq!(request.arguments["b"], json!(2));
    }

    #[test]
    fn test_null_arguments_become_empty() {
        let response = ModelResponse::tool_call("greet", Value::Null);
        let ModelTurn::ToolCall(request) = ModelTurn::classify(response).unwrap() else {
            panic!("expected tool call");
        };
        assert!(request.arguments.is_empty());
    }

    #[test]
    fn test_invalid_shapes() {
        let cases = vec![
            ModelResponse::default(),
            ModelResponse::text("   "),
            ModelResponse::tool_call("", json!({})),
            ModelResponse::tool_call("add", json!([1, 2])),
            ModelResponse::tool_call("add", json!("not json")),
        ];
        for response in cases {
            let err = ModelTurn::classify(response.clone()).unwrap_err();
            assert!(matches!(err, Error::InvalidTurn(_)), "{:?} -> {:?}", response, err);
        }
    }

    #[test]
    fn test_wire_shape() {
        let response: ModelResponse =
            serde_json::from_value(json!({ "tool_calls": [{ "name": "add", "arguments": { "a": 1 } }] }))
                .unwrap();
        assert_eq!(response.tool_calls.len(), 1);
        assert!(response.content.is_none());

        let value = serde_json::to_value(ModelResponse::text("done")).unwrap();
        assert_eq!(value, json!({ "content": "done" }));
    }
}
