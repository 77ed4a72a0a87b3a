//! Ollama chat endpoint client (`POST /api/chat`, non-streaming)

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{ModelClient, ModelResponse, RawToolCall};
use crate::config::ModelConfig;
use crate::conversation::{Message, Role};
use crate::error::{Error, Result};
use crate::tools::ToolDefinition;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    temperature: Option<f32>,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: None,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        let mut client = Self::new(config.effective_base_url(), &config.model);
        client.temperature = config.temperature;
        client
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    pub(crate) fn build_request_body(&self, transcript: &[Message], tools: &[ToolDefinition]) -> Value {
        let messages: Vec<Value> = transcript.iter().map(to_ollama_message).collect();
        let tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
        }
        if let Some(temperature) = self.temperature {
            body["options"] = json!({ "temperature": temperature });
        }
        body
    }
}

fn to_ollama_message(message: &Message) -> Value {
    match message.role {
        Role::User => json!({ "role": "user", "content": message.content.as_text() }),
        Role::Assistant => match message.as_tool_call() {
            Some(call) => json!({
                "role": "assistant",
                "content": "",
                "tool_calls": [{
                    "function": { "name": call.name, "arguments": call.arguments }
                }]
            }),
            None => json!({ "role": "assistant", "content": message.content.as_text() }),
        },
        Role::ToolResult => {
            let mut value = json!({ "role": "tool", "content": message.content.as_text() });
            if let Some(name) = &message.tool_name {
                value["tool_name"] = Value::String(name.clone());
            }
            value
        }
    }
}

/// Extract the assistant message from a decoded `/api/chat` body
pub(crate) fn parse_chat_response(body: &Value) -> Result<ModelResponse> {
    if let Some(error) = body.get("error").and_then(|e| e.as_str()) {
        return Err(Error::ModelUnavailable(error.to_string()));
    }

    let message = body
        .get("message")
        .ok_or_else(|| Error::InvalidTurn("response has no 'message' field".to_string()))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string());

    let tool_calls = match message.get("tool_calls") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(calls)) => calls
            .iter()
            .map(|call| {
                let function = call.get("function").unwrap_or(call);
                RawToolCall {
                    name: function
                        .get("name")
                        .and_then(|n| n.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    arguments: function.get("arguments").cloned().unwrap_or(Value::Null),
                }
            })
            .collect(),
        Some(other) => {
            return Err(Error::InvalidTurn(format!(
                "'tool_calls' must be an array, got {}",
                other
            )));
        }
    };

    Ok(ModelResponse { content, tool_calls })
}

#[async_trait]
impl ModelClient for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, transcript: &[Message], tools: &[ToolDefinition]) -> Result<ModelResponse> {
        let body = self.build_request_body(transcript, tools);

        debug!(
            model = %self.model,
            messages = transcript.len(),
            tools = tools.len(),
            "Ollama chat request"
        );

        let response = self
            .http
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ModelUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text = text.chars().take(200).collect::<String>();
            return Err(Error::ModelUnavailable(format!("HTTP {status}: {text}")));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| Error::ModelUnavailable(format!("undecodable response: {}", e)))?;

        parse_chat_response(&json)
    }
}
