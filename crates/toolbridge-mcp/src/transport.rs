//! Framed message transports for MCP sessions.
//!
//! A transport moves whole JSON-RPC frames. [`StdioTransport`] spawns a child
//! process and speaks newline-delimited JSON over its stdin/stdout;
//! [`ChannelTransport`] connects two in-process endpoints.

use crate::error::McpError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How long a server gets to exit after its stdin closes.
const GRACEFUL_EXIT: Duration = Duration::from_secs(5);

/// Capacity of the outgoing and incoming frame queues.
const FRAME_QUEUE: usize = 64;

/// A bidirectional stream of framed messages.
///
/// `receive` is only ever driven by one task at a time (the session reader);
/// `send` may be called concurrently.
pub trait Transport: Send + Sync {
    /// Deliver one frame to the peer.
    fn send(&self, frame: String) -> TransportFuture<'_, Result<(), McpError>>;

    /// Next frame from the peer, or `None` once the connection has ended.
    fn receive(&self) -> TransportFuture<'_, Option<String>>;

    /// Tear down the connection. Safe to call more than once.
    fn close(&self) -> TransportFuture<'_, ()>;
}

/// Async stdio transport for communicating with an MCP server process.
pub struct StdioTransport {
    label: String,
    write_tx: Mutex<Option<mpsc::Sender<String>>>,
    lines: tokio::sync::Mutex<mpsc::Receiver<String>>,
    child: tokio::sync::Mutex<Option<Child>>,
    tasks: Vec<JoinHandle<()>>,
}

impl StdioTransport {
    /// Spawn a child process and start background reader/writer tasks.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: command.to_string(),
            source: e,
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(McpError::Protocol(format!(
                "'{command}' was spawned without piped stdio"
            )));
        };
        let stderr = child.stderr.take();

        // Writer task: drains channel and writes to child stdin
        let (write_tx, mut write_rx) = mpsc::channel::<String>(FRAME_QUEUE);
        let writer = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = write_rx.recv().await {
                if stdin.write_all(msg.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        // Reader task: splits stdout into frames; ends the sequence on EOF
        let (line_tx, line_rx) = mpsc::channel::<String>(FRAME_QUEUE);
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                if line_tx.send(line).await.is_err() {
                    break;
                }
            }
        });

        let mut tasks = vec![writer, reader];

        // Server diagnostics go to the log, never to the protocol stream
        if let Some(stderr) = stderr {
            let label = command.to_string();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %label, "stderr: {line}");
                }
            }));
        }

        Ok(Self {
            label: command.to_string(),
            write_tx: Mutex::new(Some(write_tx)),
            lines: tokio::sync::Mutex::new(line_rx),
            child: tokio::sync::Mutex::new(Some(child)),
            tasks,
        })
    }

    fn writer(&self) -> Option<mpsc::Sender<String>> {
        self.write_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transport for StdioTransport {
    fn send(&self, frame: String) -> TransportFuture<'_, Result<(), McpError>> {
        Box::pin(async move {
            let lost = || McpError::ConnectionLost {
                server: self.label.clone(),
            };
            let tx = self.writer().ok_or_else(lost)?;
            tx.send(frame).await.map_err(|_| lost())
        })
    }

    fn receive(&self) -> TransportFuture<'_, Option<String>> {
        Box::pin(async move { self.lines.lock().await.recv().await })
    }

    /// Drop the write channel, give the child a grace period, then kill it.
    fn close(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            // EOF on the child's stdin
            self.write_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();

            if let Some(mut child) = self.child.lock().await.take() {
                let graceful = tokio::time::timeout(GRACEFUL_EXIT, child.wait()).await;
                if graceful.is_err() {
                    tracing::debug!(server = %self.label, "MCP server did not exit, killing it");
                    let _ = child.kill().await;
                }
            }

            for task in &self.tasks {
                task.abort();
            }
        })
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// One end of an in-process transport pair.
pub struct ChannelTransport {
    tx: Mutex<Option<mpsc::Sender<String>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<String>>,
}

impl ChannelTransport {
    /// Two connected endpoints: frames sent on one are received on the other.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(FRAME_QUEUE);
        let (b_tx, b_rx) = mpsc::channel(FRAME_QUEUE);
        (
            Self {
                tx: Mutex::new(Some(a_tx)),
                rx: tokio::sync::Mutex::new(b_rx),
            },
            Self {
                tx: Mutex::new(Some(b_tx)),
                rx: tokio::sync::Mutex::new(a_rx),
            },
        )
    }
}

impl Transport for ChannelTransport {
    fn send(&self, frame: String) -> TransportFuture<'_, Result<(), McpError>> {
        Box::pin(async move {
            let lost = || McpError::ConnectionLost {
                server: "channel".to_string(),
            };
            let tx = self
                .tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
                .ok_or_else(lost)?;
            tx.send(frame).await.map_err(|_| lost())
        })
    }

    fn receive(&self) -> TransportFuture<'_, Option<String>> {
        Box::pin(async move { self.rx.lock().await.recv().await })
    }

    fn close(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
            // A reader parked in `receive` holds the lock; it will see the
            // peer's end of stream instead.
            if let Ok(mut rx) = self.rx.try_lock() {
                rx.close();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_echo_process() {
        // Use `cat` as a simple echo process
        let transport = StdioTransport::spawn("cat", &[], &HashMap::new());
        assert!(transport.is_ok());
        transport.unwrap().close().await;
    }

    #[tokio::test]
    async fn spawn_nonexistent_command_fails() {
        let result =
            StdioTransport::spawn("this_command_does_not_exist_xyz123", &[], &HashMap::new());
        match result {
            Err(McpError::SpawnFailed { name, .. }) => {
                assert_eq!(name, "this_command_does_not_exist_xyz123");
            }
            Err(other) => panic!("Expected SpawnFailed, got: {other:?}"),
            Ok(_) => panic!("Expected error, got Ok"),
        }
    }

    #[tokio::test]
    async fn frames_roundtrip_through_cat() {
        let transport = StdioTransport::spawn("cat", &[], &HashMap::new()).unwrap();

        transport
            .send(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_string())
            .await
            .unwrap();
        transport.send("second".to_string()).await.unwrap();

        assert_eq!(
            transport.receive().await.as_deref(),
            Some(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
        );
        assert_eq!(transport.receive().await.as_deref(), Some("second"));

        transport.close().await;
    }

    #[tokio::test]
    async fn receive_ends_when_process_exits() {
        let transport = StdioTransport::spawn("true", &[], &HashMap::new()).unwrap();
        assert_eq!(transport.receive().await, None);
        transport.close().await;
    }

    #[tokio::test]
    async fn send_after_close_is_connection_lost() {
        let transport = StdioTransport::spawn("cat", &[], &HashMap::new()).unwrap();
        transport.close().await;
        // Closing twice is harmless
        transport.close().await;
        match transport.send("late".to_string()).await {
            Err(McpError::ConnectionLost { server }) => assert_eq!(server, "cat"),
            other => panic!("Expected ConnectionLost, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_kills_process_that_ignores_eof() {
        tokio::time::pause();
        // `sleep` never reads stdin, so only the kill path ends it
        let transport =
            StdioTransport::spawn("sleep", &["30".to_string()], &HashMap::new()).unwrap();
        transport.close().await;
        assert_eq!(transport.receive().await, None);
    }

    #[tokio::test]
    async fn channel_pair_delivers_in_order() {
        let (client, server) = ChannelTransport::pair();
        client.send("one".into()).await.unwrap();
        client.send("two".into()).await.unwrap();
        assert_eq!(server.receive().await.as_deref(), Some("one"));
        assert_eq!(server.receive().await.as_deref(), Some("two"));

        server.send("back".into()).await.unwrap();
        assert_eq!(client.receive().await.as_deref(), Some("back"));
    }

    #[tokio::test]
    async fn channel_close_ends_peer_stream() {
        let (client, server) = ChannelTransport::pair();
        server.close().await;
        assert_eq!(client.receive().await, None);
        assert!(matches!(
            client.send("x".into()).await,
            Err(McpError::ConnectionLost { .. })
        ));
        assert!(matches!(
            server.send("x".into()).await,
            Err(McpError::ConnectionLost { .. })
        ));
    }
}
