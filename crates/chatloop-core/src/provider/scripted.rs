//! Deterministic model double for tests and offline demos

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ModelClient, ModelResponse};
use crate::conversation::{Message, Role};
use crate::error::{Error, Result};
use crate::tools::ToolDefinition;

/// One scripted step
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Respond(ModelResponse),
    /// Respond only after sleeping; used to exercise timeouts and cancellation
    Delayed(Duration, ModelResponse),
    /// Fail as if the endpoint were unreachable
    Unavailable(String),
}

impl From<ModelResponse> for ScriptedReply {
    fn from(response: ModelResponse) -> Self {
        Self::Respond(response)
    }
}

/// Replays a fixed script of replies
///
/// The reply is picked by counting assistant messages in the submitted
/// transcript, so the same transcript always yields the same reply.
/// Assistant messages already present before the script starts are skipped
/// with [`ScriptedModelClient::with_offset`].
pub struct ScriptedModelClient {
    script: Vec<ScriptedReply>,
    offset: usize,
    seen: Mutex<Vec<SeenRequest>>,
}

/// What the client was asked, recorded for assertions
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub transcript_len: usize,
    pub tool_names: Vec<String>,
}

impl ScriptedModelClient {
    pub fn new<I, R>(script: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ScriptedReply>,
    {
        Self {
            script: script.into_iter().map(Into::into).collect(),
            offset: 0,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Ignore the first `offset` assistant messages of every transcript
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Number of `generate` calls so far
    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, transcript: &[Message], tools: &[ToolDefinition]) -> Result<ModelResponse> {
        self.seen.lock().push(SeenRequest {
            transcript_len: transcript.len(),
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
        });

        let answered = transcript
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count();

        let reply = answered.checked_sub(self.offset).and_then(|step| self.script.get(step));
        match reply {
            Some(ScriptedReply::Respond(response)) => Ok(response.clone()),
            Some(ScriptedReply::Delayed(after, response)) => {
                tokio::time::sleep(*after).await;
                Ok(response.clone())
            }
            Some(ScriptedReply::Unavailable(reason)) => Err(Error::ModelUnavailable(reason.clone())),
            None => Err(Error::ModelUnavailable(format!(
                "script exhausted after {} replies",
                self.script.len()
            ))),
        }
    }
}
