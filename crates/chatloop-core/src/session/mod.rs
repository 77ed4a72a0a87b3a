//! Session module
//!
//! A [`Session`] owns one conversation's transcript and shares an
//! orchestrator with every other session. [`SessionDriver`] wraps a session
//! in the line-oriented interactive loop used by the CLI.
//!
//! ```ignore
//! use chatloop_core::session::{Session, SessionDriver};
//!
//! let session = Session::new(orchestrator.clone());
//! let mut driver = SessionDriver::new(session);
//! let stats = driver.run(tokio::io::BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
//! ```

mod driver;

pub use driver::{DriverStats, SessionDriver, DEFAULT_PROMPT};

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::conversation::{ConversationState, Message};
use crate::error::Result;
use crate::orchestrator::ToolCallOrchestrator;

/// Session identifier
pub type SessionId = String;

/// One user-facing conversation
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    conversation: ConversationState,
    orchestrator: Arc<ToolCallOrchestrator>,
}

impl Session {
    pub fn new(orchestrator: Arc<ToolCallOrchestrator>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), orchestrator)
    }

    pub fn with_id(id: impl Into<SessionId>, orchestrator: Arc<ToolCallOrchestrator>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            conversation: ConversationState::new(),
            orchestrator,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Run one query; earlier turns stay in the transcript as context
    pub async fn ask(&mut self, query: &str) -> Result<String> {
        self.ask_with_cancel(query, CancellationToken::new()).await
    }

    pub async fn ask_with_cancel(&mut self, query: &str, cancel: CancellationToken) -> Result<String> {
        debug!(session = %self.id, "Session query");
        self.orchestrator
            .run_with_cancel(&mut self.conversation, query, cancel)
            .await
    }

    /// Full transcript, including partial transcripts of failed runs
    pub fn transcript(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    /// Start over with an empty transcript
    pub fn clear(&mut self) {
        self.conversation = ConversationState::new();
    }

    pub fn save_transcript(&self, path: &Path) -> Result<()> {
        self.conversation.save_json(path)
    }
}
