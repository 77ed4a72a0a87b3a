//! Line-oriented interactive driver

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Session;
use crate::error::{Error, Result};

pub const DEFAULT_PROMPT: &str = "Query: ";

/// Outcome counts for one interactive session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub answered: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Reads one query per line and writes one answer (or `Error: ...`) per query
///
/// Stops on `quit`/`exit`, end of input, or when the shutdown token fires.
/// A failed query never stops the driver. An interrupt cancels the query in
/// flight and returns to the prompt; an interrupt at the prompt ends the loop.
pub struct SessionDriver {
    session: Session,
    prompt: String,
    shutdown: CancellationToken,
    interrupt: Arc<Notify>,
}

impl SessionDriver {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            prompt: DEFAULT_PROMPT.to_string(),
            shutdown: CancellationToken::new(),
            interrupt: Arc::new(Notify::new()),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Cancelling `token` abandons the in-flight query and ends the loop
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// `notify_waiters` on `interrupt` cancels only the current query
    pub fn with_interrupt(mut self, interrupt: Arc<Notify>) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    pub async fn run<R, W>(&mut self, mut input: R, mut output: W) -> Result<DriverStats>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut stats = DriverStats::default();
        let mut line = String::new();

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            output.write_all(self.prompt.as_bytes()).await?;
            output.flush().await?;

            line.clear();
            let read = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.interrupt.notified() => break,
                read = input.read_line(&mut line) => read?,
            };
            if read == 0 {
                debug!("Input closed");
                break;
            }

            let query = line.trim();
            if query.is_empty() {
                continue;
            }
            if is_exit_command(query) {
                break;
            }

            let run = self.shutdown.child_token();
            let ask = self.session.ask_with_cancel(query, run.clone());
            tokio::pin!(ask);
            let outcome = loop {
                tokio::select! {
                    outcome = &mut ask => break outcome,
                    _ = self.interrupt.notified(), if !run.is_cancelled() => {
                        debug!("Query interrupted");
                        run.cancel();
                    }
                }
            };

            match outcome {
                Ok(answer) => {
                    stats.answered += 1;
                    output.write_all(format!("\n{}\n\n", answer).as_bytes()).await?;
                }
                Err(Error::Cancelled) if self.shutdown.is_cancelled() => break,
                Err(Error::Cancelled) => {
                    stats.cancelled += 1;
                    output.write_all(b"\nCancelled\n\n").await?;
                }
                Err(e) => {
                    stats.failed += 1;
                    output.write_all(format!("\nError: {}\n\n", e).as_bytes()).await?;
                }
            }
            output.flush().await?;
        }

        info!(
            answered = stats.answered,
            failed = stats.failed,
            cancelled = stats.cancelled,
            "Session ended"
        );
        Ok(stats)
    }
}

fn is_exit_command(input: &str) -> bool {
    input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit")
}
