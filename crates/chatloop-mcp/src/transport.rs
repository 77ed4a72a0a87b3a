//! MCP Transport layer implementations
//!
//! Every transport moves newline-free JSON values; framing is the
//! transport's concern, not the client's.

use std::collections::HashMap;
use std::io;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

/// Transport trait for MCP communication
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&mut self, message: Value) -> io::Result<()>;
    /// Next message from the peer; `None` once the peer has gone away
    async fn receive(&mut self) -> io::Result<Option<Value>>;
    async fn close(&mut self) -> io::Result<()>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&mut self, message: Value) -> io::Result<()> {
        (**self).send(message).await
    }

    async fn receive(&mut self) -> io::Result<Option<Value>> {
        (**self).receive().await
    }

    async fn close(&mut self) -> io::Result<()> {
        (**self).close().await
    }
}

/// Read one JSON value per line, skipping blank lines
async fn read_json_line<R>(reader: &mut R) -> io::Result<Option<Value>>
where
    R: tokio::io::AsyncBufRead + Unpin + Send,
{
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        if line.trim().is_empty() {
            continue;
        }
        // The line is consumed either way, so a caller may keep reading after a bad one
        let value: Value = serde_json::from_str(line.trim())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        return Ok(Some(value));
    }
}

async fn write_json_line<W>(writer: &mut W, message: &Value) -> io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    let json = serde_json::to_string(message)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Stdio transport for subprocess communication
pub struct StdioTransport {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: BufReader<ChildStdout>,
}

impl StdioTransport {
    pub async fn spawn(command: &str, args: &[String], env: &HashMap<String, String>) -> io::Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("Failed to capture stdout"))?;
        let stdin = child.stdin.take();

        tracing::debug!(command, ?args, pid = ?child.id(), "Spawned MCP server process");

        Ok(Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
        })
    }

    /// Exit status of the server process, if it has exited
    pub fn try_wait(&mut self) -> io::Result<Option<std::process::ExitStatus>> {
        self.child.try_wait()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&mut self, message: Value) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::other("Stdin not available"))?;
        write_json_line(stdin, &message).await
    }

    async fn receive(&mut self) -> io::Result<Option<Value>> {
        read_json_line(&mut self.reader).await
    }

    async fn close(&mut self) -> io::Result<()> {
        // Closing stdin lets well-behaved servers exit on their own
        self.stdin.take();
        self.child.kill().await
    }
}

/// Newline-delimited JSON over any reader/writer pair
pub struct LineTransport<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send + Sync,
    W: AsyncWrite + Unpin + Send + Sync,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

#[async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send + Sync,
    W: AsyncWrite + Unpin + Send + Sync,
{
    async fn send(&mut self, message: Value) -> io::Result<()> {
        write_json_line(&mut self.writer, &message).await
    }

    async fn receive(&mut self) -> io::Result<Option<Value>> {
        read_json_line(&mut self.reader).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

/// Server-side transport over this process's own stdin/stdout
pub struct StdioServerTransport {
    lines: LineTransport<BufReader<tokio::io::Stdin>, tokio::io::Stdout>,
}

impl StdioServerTransport {
    pub fn new() -> Self {
        Self {
            lines: LineTransport::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout()),
        }
    }
}

impl Default for StdioServerTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioServerTransport {
    async fn send(&mut self, message: Value) -> io::Result<()> {
        self.lines.send(message).await
    }

    async fn receive(&mut self) -> io::Result<Option<Value>> {
        self.lines.receive().await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.lines.writer.flush().await
    }
}

/// In-process transport; one end of a connected pair
pub struct MemoryTransport {
    tx: Option<mpsc::UnboundedSender<Value>>,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl MemoryTransport {
    /// Create two connected ends: whatever one sends, the other receives
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self { tx: Some(a_tx), rx: b_rx },
            Self { tx: Some(b_tx), rx: a_rx },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, message: Value) -> io::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "Transport closed"))?;
        tx.send(message)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "Peer dropped"))
    }

    async fn receive(&mut self) -> io::Result<Option<Value>> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) -> io::Result<()> {
        self.tx.take();
        self.rx.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pair_is_bidirectional() {
        let (mut a, mut b) = MemoryTransport::pair();
        a.send(serde_json::json!({"n": 1})).await.unwrap();
        b.send(serde_json::json!({"n": 2})).await.unwrap();
        assert_eq!(b.receive().await.unwrap(), Some(serde_json::json!({"n": 1})));
        assert_eq!(a.receive().await.unwrap(), Some(serde_json::json!({"n": 2})));
    }

    #[tokio::test]
    async fn test_memory_close_ends_peer_stream() {
        let (mut a, mut b) = MemoryTransport::pair();
        a.close().await.unwrap();
        assert_eq!(b.receive().await.unwrap(), None);
        assert!(a.send(serde_json::json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_read_json_line_skips_blank_lines() {
        let data: &[u8] = b"\n  \n{\"id\":1}\n";
        let mut reader = BufReader::new(data);
        let value = read_json_line(&mut reader).await.unwrap();
        assert_eq!(value, Some(serde_json::json!({"id": 1})));
        assert_eq!(read_json_line(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_json_line_recovers_after_bad_line() {
        let data: &[u8] = b"{\"truncated\":\n{\"id\":2}\n";
        let mut reader = BufReader::new(data);
        let err = read_json_line(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(read_json_line(&mut reader).await.unwrap(), Some(serde_json::json!({"id": 2})));
    }
}
